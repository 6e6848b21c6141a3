use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The archive is missing structure it must have; nothing of it was kept.
    #[error("ingest fatal: {0}")]
    Fatal(String),

    #[error("run label `{0}` already exists")]
    DuplicateLabel(String),

    /// The store itself failed; later archives would fail the same way.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<walkdir::Error> for IngestError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}
