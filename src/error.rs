use thiserror::Error;

/// Failures surfaced by relay cycles and startup.
///
/// Cycle loops only inspect these to pick a log line; none of them alter the
/// retry schedule.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("outbox store error: {0}")]
    Store(#[source] sqlx::Error),

    #[error("source read error: {0}")]
    Source(#[source] sqlx::Error),

    #[error("malformed source row: {0}")]
    MalformedRow(String),

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("publisher setup failed: {0}")]
    PublisherSetup(String),

    #[error("broker probe on {topic} was not accepted")]
    ProbeFailed { topic: String },
}

impl RelayError {
    /// Classifies a source-side sqlx error, splitting decode problems from
    /// storage availability.
    pub fn from_source(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { index, source } => {
                RelayError::MalformedRow(format!("column {index}: {source}"))
            }
            sqlx::Error::ColumnNotFound(column) => {
                RelayError::MalformedRow(format!("missing column {column}"))
            }
            other => RelayError::Source(other),
        }
    }
}
