pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding vector must not be empty")]
    EmptyEmbedding,

    #[error("unknown filter operator: {0}")]
    InvalidFilterOperator(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("k must be a positive integer")]
    InvalidK,

    #[error("unknown similarity metric: {0}")]
    UnknownMetric(String),

    #[error("unknown index kind: {0}")]
    UnknownIndexKind(String),

    #[error("embedding service is not available; supply a vector instead")]
    EmbedderUnavailable,

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
