use std::sync::Arc;

use ground_core::{IngestError, NewSample, Sample};
use ground_store::SampleStore;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::broadcast::Broadcaster;

/// Validate, persist, then publish.
///
/// A sample reaches subscribers only after the store has accepted it, so a
/// client never sees a live event that is missing from history.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn SampleStore>,
    broadcaster: Broadcaster,
}

impl Ingestor {
    pub fn new(store: Arc<dyn SampleStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    /// Ingest a raw request body.
    pub fn ingest(&self, body: &Value) -> Result<Sample, IngestError> {
        let sample = NewSample::from_json(body).inspect_err(|e| {
            debug!(kind = e.error_kind(), error = %e, "rejected sample");
        })?;
        self.ingest_sample(sample)
    }

    #[instrument(skip(self, sample), fields(session_id = %sample.session_id))]
    pub fn ingest_sample(&self, sample: NewSample) -> Result<Sample, IngestError> {
        let stored = self.store.append(&sample).map_err(|e| {
            let err = IngestError::from(e);
            error!(kind = err.error_kind(), error = %err, "failed to persist sample");
            err
        })?;

        let report = self.broadcaster.publish(&stored.session_id, &stored);
        debug!(
            sequence_no = stored.sequence_no,
            delivered = report.delivered,
            evicted = report.evicted,
            "sample ingested"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ground_core::SessionId;
    use ground_store::{Database, SqliteSampleStore, StoreError};
    use serde_json::json;

    use crate::registry::SubscriberRegistry;
    use crate::subscriber::{Envelope, Subscriber};

    fn setup(store: Arc<dyn SampleStore>) -> (Ingestor, Arc<SubscriberRegistry>) {
        let registry = Arc::new(SubscriberRegistry::new());
        let ingestor = Ingestor::new(store, Broadcaster::new(Arc::clone(&registry)));
        (ingestor, registry)
    }

    fn sqlite() -> Arc<SqliteSampleStore> {
        Arc::new(SqliteSampleStore::new(Database::in_memory().unwrap()))
    }

    fn watch(
        registry: &SubscriberRegistry,
        session: &str,
    ) -> (Arc<Subscriber>, tokio::sync::mpsc::Receiver<Envelope>) {
        let (sub, rx) = Subscriber::new(SessionId::from_raw(session), 16);
        registry.register(Arc::clone(&sub));
        (sub, rx)
    }

    fn body(identifier: &str, t: u32) -> Value {
        json!({
            "timestamp": format!("T+{t}"),
            "identifier": identifier,
            "velocity": 1.5 * f64::from(t),
            "air_pressure": 1013.25,
        })
    }

    #[test]
    fn valid_sample_is_stored_then_published() {
        let store = sqlite();
        let (ingestor, registry) = setup(store.clone());
        let (_sub, mut rx) = watch(&registry, "sim-1");

        let sample = ingestor.ingest(&body("sim-1", 2)).unwrap();
        assert_eq!(sample.timestamp, "T+2");
        assert_eq!(sample.velocity, 3.0);

        let history = store.recent(&SessionId::from_raw("sim-1"), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence_no, sample.sequence_no);

        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.sequence_no, sample.sequence_no);
        let value: Value = serde_json::from_str(&pushed.payload).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["data"]["identifier"], "sim-1");
    }

    #[test]
    fn other_sessions_are_not_notified() {
        let (ingestor, registry) = setup(sqlite());
        let (_a, mut a_rx) = watch(&registry, "sim-1");
        let (_b, mut b_rx) = watch(&registry, "sim-2");

        ingestor.ingest(&body("sim-1", 0)).unwrap();

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn invalid_body_touches_nothing() {
        let store = sqlite();
        let (ingestor, registry) = setup(store.clone());
        let (_sub, mut rx) = watch(&registry, "sim-1");

        let err = ingestor
            .ingest(&json!({"timestamp": "T+0", "identifier": "sim-1", "air_pressure": 1000.0}))
            .unwrap_err();
        assert_eq!(
            err,
            IngestError::Validation("missing required field: velocity".into())
        );
        assert!(err.is_client_error());
        assert!(store.history(None, 10).unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn non_object_body_is_rejected() {
        let (ingestor, _) = setup(sqlite());
        let err = ingestor.ingest(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    struct RejectingStore;

    impl SampleStore for RejectingStore {
        fn append(&self, _: &NewSample) -> Result<Sample, StoreError> {
            Err(StoreError::Database("database is locked".into()))
        }

        fn recent(&self, _: &SessionId, _: u32) -> Result<Vec<Sample>, StoreError> {
            Ok(Vec::new())
        }

        fn since(&self, _: &SessionId, _: i64, _: u32) -> Result<Vec<Sample>, StoreError> {
            Ok(Vec::new())
        }

        fn history(&self, _: Option<&SessionId>, _: u32) -> Result<Vec<Sample>, StoreError> {
            Ok(Vec::new())
        }

        fn distinct_sessions(&self) -> Result<Vec<SessionId>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn persistence_failure_is_not_published() {
        let (ingestor, registry) = setup(Arc::new(RejectingStore));
        let (sub, mut rx) = watch(&registry, "sim-1");

        let err = ingestor.ingest(&body("sim-1", 0)).unwrap_err();
        assert!(matches!(err, IngestError::Persistence(ref m) if m.contains("locked")));
        assert_eq!(err.error_kind(), "persistence");
        assert!(!err.is_client_error());
        assert!(rx.try_recv().is_err());
        assert!(!sub.is_evicted());
    }

    #[test]
    fn sequence_numbers_follow_ingest_order() {
        let (ingestor, registry) = setup(sqlite());
        let (_sub, mut rx) = watch(&registry, "sim-1");

        let seqs: Vec<i64> = (0..5)
            .map(|t| ingestor.ingest(&body("sim-1", t)).unwrap().sequence_no)
            .collect();
        let pushed: Vec<i64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.sequence_no)
            .collect();
        assert_eq!(pushed, seqs);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
}
