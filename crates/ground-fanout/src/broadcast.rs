use std::sync::Arc;

use ground_core::{Sample, SessionId, StreamMessage};
use tracing::{debug, trace, warn};

use crate::registry::SubscriberRegistry;
use crate::subscriber::Envelope;

/// Outcome of one publish call. Informational only; publishing never fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Pushes queued successfully.
    pub delivered: usize,
    /// Subscribers dropped because their push failed.
    pub evicted: usize,
}

/// Pushes freshly persisted samples to the subscribers of their session.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Serialize `sample` once as an `event` message and queue it for every
    /// subscriber of `session_id` present when the call starts.
    ///
    /// A failed push evicts that subscriber only; the rest of the snapshot is
    /// still served.
    pub fn publish(&self, session_id: &SessionId, sample: &Sample) -> PublishReport {
        let payload: Arc<str> = match StreamMessage::Event(sample.clone()).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(session_id = %session_id, sequence_no = sample.sequence_no, error = %e, "failed to serialize event");
                return PublishReport::default();
            }
        };

        let snapshot = self.registry.snapshot(session_id);
        let mut report = PublishReport {
            recipients: snapshot.len(),
            ..Default::default()
        };

        for subscriber in snapshot {
            let envelope = Envelope {
                sequence_no: sample.sequence_no,
                payload: Arc::clone(&payload),
            };
            match subscriber.deliver(envelope) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(
                        session_id = %session_id,
                        subscriber_id = %subscriber.id(),
                        error = %e,
                        "delivery failed, dropping subscriber"
                    );
                    let _ = self.registry.unregister(session_id, subscriber.id());
                    subscriber.evict();
                    report.evicted += 1;
                }
            }
        }

        trace!(
            session_id = %session_id,
            sequence_no = sample.sequence_no,
            recipients = report.recipients,
            delivered = report.delivered,
            "published event"
        );
        report
    }
}
