pub mod errors;
pub mod ids;
pub mod message;
pub mod sample;

pub use errors::{DeliveryError, IngestError};
pub use ids::{SessionId, SubscriberId};
pub use message::StreamMessage;
pub use sample::{NewSample, Sample};
