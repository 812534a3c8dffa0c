use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("no indexable text extracted from {0}")]
    EmptyDocument(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IngestError {
    /// Conditions callers surface as a warning, not a failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedFormat(_) | IngestError::EmptyDocument(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("backend not configured: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
