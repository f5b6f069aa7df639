use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use ground_core::{DeliveryError, SessionId, SubscriberId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One serialized push, tagged with the sequence number it carries so the
/// handshake can drop pushes it already delivered during catch-up.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub sequence_no: i64,
    pub payload: Arc<str>,
}

/// A live observer of one session.
///
/// Cloned as `Arc<Subscriber>` between the registry and the handshake that
/// owns the receiving half of its queue.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    session_id: SessionId,
    tx: mpsc::Sender<Envelope>,
    registered_at: OnceLock<DateTime<Utc>>,
    evicted: CancellationToken,
}

impl Subscriber {
    /// Create a subscriber with a queue of `capacity` pending pushes.
    pub fn new(session_id: SessionId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Self {
            id: SubscriberId::new(),
            session_id,
            tx,
            registered_at: OnceLock::new(),
            evicted: CancellationToken::new(),
        };
        (Arc::new(subscriber), rx)
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// When the registry first accepted this subscriber. `None` until then.
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.registered_at.get().copied()
    }

    pub(crate) fn mark_registered(&self) {
        let _ = self.registered_at.set(Utc::now());
    }

    /// Queue a push without waiting. A full queue counts as a failure so a
    /// stuck reader never holds up the publisher.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Tell the owning handshake it has been dropped from the registry.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// Resolves once [`Subscriber::evict`] has been called.
    pub async fn evicted(&self) {
        self.evicted.cancelled().await;
    }
}
