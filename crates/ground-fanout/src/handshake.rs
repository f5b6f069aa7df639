//! Replay-then-stream handshake for one live subscriber.
//!
//! `Connecting → Replaying → Live → Closed`. The replay batch goes out before
//! the subscriber is registered. After registering, anything persisted since
//! the newest replayed sample is sent as ordinary `event` messages, and live
//! pushes at or below that high-water mark are skipped, so the transition
//! neither loses nor repeats a sample.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use ground_core::{Sample, SessionId, StreamMessage, SubscriberId};
use ground_store::SampleStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::registry::SubscriberRegistry;
use crate::subscriber::{Envelope, Subscriber};

/// Tunables for a subscription.
#[derive(Clone, Debug)]
pub struct HandshakeConfig {
    /// Samples sent in the `initial` batch.
    pub replay_limit: u32,
    /// Page size used while catching up after registration.
    pub catch_up_page: u32,
    /// Pending pushes a subscriber may have before it is dropped.
    pub queue_capacity: usize,
    /// How long one write to the transport may take before the
    /// subscription is closed as a transport error.
    pub send_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            replay_limit: 50,
            catch_up_page: 500,
            queue_capacity: 256,
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    Replaying,
    Live,
    Closed,
}

/// Why a subscription ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Inbound stream ended or the peer sent a close frame.
    ClientClosed,
    /// Reading from or writing to the transport failed.
    TransportError(String),
    /// A push failed and the broadcaster dropped the subscriber.
    Evicted,
    /// The process is shutting down.
    Shutdown,
    /// History could not be read from the store.
    ReplayFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::Evicted => f.write_str("evicted"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::ReplayFailed(e) => write!(f, "replay failed: {e}"),
        }
    }
}

/// Summary of a finished subscription.
#[derive(Clone, Debug)]
pub struct HandshakeOutcome {
    pub subscriber_id: SubscriberId,
    pub reason: CloseReason,
    /// When the subscriber joined the registry; `None` if it never did.
    pub registered_at: Option<DateTime<Utc>>,
    /// Samples in the `initial` batch.
    pub replayed: usize,
    /// Samples sent during catch-up.
    pub caught_up: usize,
    /// Live pushes forwarded to the transport.
    pub streamed: usize,
}

/// Shared entry point: one `Handshake` serves every connection.
#[derive(Clone)]
pub struct Handshake {
    store: Arc<dyn SampleStore>,
    registry: Arc<SubscriberRegistry>,
    config: HandshakeConfig,
    shutdown: CancellationToken,
}

impl Handshake {
    pub fn new(
        store: Arc<dyn SampleStore>,
        registry: Arc<SubscriberRegistry>,
        config: HandshakeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            shutdown,
        }
    }

    /// Drive one subscription to completion.
    ///
    /// `inbound` is only watched for liveness: any item keeps the connection
    /// open, an error or the end of the stream closes it. Messages are
    /// written to `outbound` as JSON text. The subscriber is unregistered
    /// exactly once on the way out, whatever ended the subscription.
    pub async fn run<In, T, E, Out>(
        &self,
        session_id: SessionId,
        inbound: In,
        outbound: Out,
    ) -> HandshakeOutcome
    where
        In: Stream<Item = Result<T, E>> + Unpin,
        E: fmt::Display,
        Out: Sink<String> + Unpin,
        Out::Error: fmt::Display,
    {
        let (subscriber, queue) = Subscriber::new(session_id.clone(), self.config.queue_capacity);
        let span = info_span!(
            "subscription",
            session_id = %session_id,
            subscriber_id = %subscriber.id()
        );

        let mut session = Session {
            handshake: self,
            subscriber: Arc::clone(&subscriber),
            state: HandshakeState::Connecting,
            high_water: 0,
            replayed: 0,
            caught_up: 0,
            streamed: 0,
        };

        async move {
            info!("subscriber connected");
            let reason = session.drive(inbound, outbound, queue).await;
            session.close(reason)
        }
        .instrument(span)
        .await
    }
}

/// Per-connection state. Lives only inside [`Handshake::run`].
struct Session<'a> {
    handshake: &'a Handshake,
    subscriber: Arc<Subscriber>,
    state: HandshakeState,
    high_water: i64,
    replayed: usize,
    caught_up: usize,
    streamed: usize,
}

impl Session<'_> {
    fn transition(&mut self, next: HandshakeState) {
        trace!(from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
    }

    async fn drive<In, T, E, Out>(
        &mut self,
        mut inbound: In,
        mut outbound: Out,
        mut queue: mpsc::Receiver<Envelope>,
    ) -> CloseReason
    where
        In: Stream<Item = Result<T, E>> + Unpin,
        E: fmt::Display,
        Out: Sink<String> + Unpin,
        Out::Error: fmt::Display,
    {
        let handshake = self.handshake;
        let store = &handshake.store;
        let page_size = handshake.config.catch_up_page.max(1);
        let session_id = self.subscriber.session_id().clone();

        self.transition(HandshakeState::Replaying);
        let history = match store.recent(&session_id, handshake.config.replay_limit) {
            Ok(history) => history,
            Err(e) => return CloseReason::ReplayFailed(e.to_string()),
        };
        // Newest first, so the head is the high-water mark.
        self.high_water = history.first().map_or(0, |s| s.sequence_no);
        self.replayed = history.len();
        let initial = StreamMessage::Initial(history);
        if let Err(reason) = self.send(&mut inbound, &mut outbound, &initial).await {
            return reason;
        }

        let _ = handshake.registry.register(Arc::clone(&self.subscriber));

        loop {
            let page = match store.since(&session_id, self.high_water, page_size) {
                Ok(page) => page,
                Err(e) => return CloseReason::ReplayFailed(e.to_string()),
            };
            let full_page = page.len() >= page_size as usize;
            for sample in page {
                self.high_water = sample.sequence_no;
                self.caught_up += 1;
                let event = StreamMessage::Event(sample);
                if let Err(reason) = self.send(&mut inbound, &mut outbound, &event).await {
                    return reason;
                }
            }
            if !full_page {
                break;
            }
        }
        if self.caught_up > 0 {
            debug!(caught_up = self.caught_up, "sent samples persisted during replay");
        }

        self.transition(HandshakeState::Live);
        let shutdown = handshake.shutdown.clone();
        let subscriber = Arc::clone(&self.subscriber);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return CloseReason::Shutdown,
                () = subscriber.evicted() => return CloseReason::Evicted,
                frame = inbound.next() => match frame {
                    Some(Ok(_)) => trace!("inbound frame"),
                    Some(Err(e)) => return CloseReason::TransportError(e.to_string()),
                    None => return CloseReason::ClientClosed,
                },
                envelope = queue.recv() => match envelope {
                    Some(envelope) if envelope.sequence_no <= self.high_water => {
                        trace!(sequence_no = envelope.sequence_no, "skipping push already sent during catch-up");
                    }
                    Some(envelope) => {
                        let text = envelope.payload.to_string();
                        if let Err(reason) = self.write(&mut inbound, &mut outbound, text).await {
                            return reason;
                        }
                        self.streamed += 1;
                    }
                    None => return CloseReason::Evicted,
                },
            }
        }
    }

    async fn send<In, T, E, Out>(
        &self,
        inbound: &mut In,
        outbound: &mut Out,
        message: &StreamMessage,
    ) -> Result<(), CloseReason>
    where
        In: Stream<Item = Result<T, E>> + Unpin,
        E: fmt::Display,
        Out: Sink<String> + Unpin,
        Out::Error: fmt::Display,
    {
        let json = message.to_json().map_err(|e| {
            CloseReason::TransportError(format!("serialize {}: {e}", message.kind()))
        })?;
        self.write(inbound, outbound, json).await
    }

    /// Write one frame. A peer that stops reading cannot park the
    /// subscription: shutdown, eviction and the inbound side stay watched
    /// while the write is pending, and the write itself is bounded by
    /// `send_timeout`.
    async fn write<In, T, E, Out>(
        &self,
        inbound: &mut In,
        outbound: &mut Out,
        text: String,
    ) -> Result<(), CloseReason>
    where
        In: Stream<Item = Result<T, E>> + Unpin,
        E: fmt::Display,
        Out: Sink<String> + Unpin,
        Out::Error: fmt::Display,
    {
        let handshake = self.handshake;
        let limit = handshake.config.send_timeout;
        let send = tokio::time::timeout(limit, outbound.send(text));
        tokio::pin!(send);

        loop {
            tokio::select! {
                biased;
                () = handshake.shutdown.cancelled() => return Err(CloseReason::Shutdown),
                () = self.subscriber.evicted() => return Err(CloseReason::Evicted),
                sent = &mut send => {
                    return match sent {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(CloseReason::TransportError(e.to_string())),
                        Err(_) => Err(CloseReason::TransportError(format!(
                            "send timed out after {}ms",
                            limit.as_millis()
                        ))),
                    };
                }
                frame = inbound.next() => match frame {
                    Some(Ok(_)) => trace!("inbound frame"),
                    Some(Err(e)) => return Err(CloseReason::TransportError(e.to_string())),
                    None => return Err(CloseReason::ClientClosed),
                },
            }
        }
    }

    fn close(mut self, reason: CloseReason) -> HandshakeOutcome {
        self.transition(HandshakeState::Closed);
        let _ = self
            .handshake
            .registry
            .unregister(self.subscriber.session_id(), self.subscriber.id());

        let registered_at = self.subscriber.registered_at();
        let live_ms = registered_at.map(|at| (Utc::now() - at).num_milliseconds());
        match &reason {
            CloseReason::ReplayFailed(_) => warn!(%reason, "subscription closed"),
            _ => info!(%reason, streamed = self.streamed, ?live_ms, "subscription closed"),
        }

        HandshakeOutcome {
            subscriber_id: self.subscriber.id().clone(),
            reason,
            registered_at,
            replayed: self.replayed,
            caught_up: self.caught_up,
            streamed: self.streamed,
        }
    }
}
