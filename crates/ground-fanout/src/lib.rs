//! Live fan-out of ingested samples to per-session subscribers.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `subscriber` | One observer: bounded queue, eviction signal |
//! | `registry` | Session → subscriber set, snapshot-before-iterate |
//! | `broadcast` | Push one sample to every subscriber of its session |
//! | `handshake` | Replay, register, catch up, then stream until closed |
//! | `ingest` | Validate, persist, then publish |
//!
//! Nothing here knows about HTTP or WebSockets; the server crate adapts its
//! sockets to the `Stream`/`Sink` pair the handshake drives.

pub mod broadcast;
pub mod handshake;
pub mod ingest;
pub mod registry;
pub mod subscriber;

pub use broadcast::{Broadcaster, PublishReport};
pub use handshake::{CloseReason, Handshake, HandshakeConfig, HandshakeOutcome, HandshakeState};
pub use ingest::Ingestor;
pub use registry::SubscriberRegistry;
pub use subscriber::{Envelope, Subscriber};
