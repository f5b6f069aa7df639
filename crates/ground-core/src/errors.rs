/// Failures of the ingestion path.
///
/// `Validation` is rejected before anything touches the store; `Persistence`
/// means the store refused the append and nothing was broadcast.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("invalid sample: {0}")]
    Validation(String),

    #[error("failed to persist sample: {0}")]
    Persistence(String),
}

impl IngestError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
        }
    }
}

/// A push to a single subscriber failed. Never leaves the broadcast engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    Full,

    #[error("subscriber is disconnected")]
    Closed,
}
