use std::path::PathBuf;

use credentials::AuthError;

pub type StageResult<T> = Result<T, StageError>;

/// Errors raised while staging objects. None of them are retried here.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("local file {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object {key} not found")]
    NotFound { key: String },

    #[error("{operation} rejected by object store ({status}): {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid signed url ttl: {0}")]
    InvalidTtl(String),

    #[error("invalid object url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("object store authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("object store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("object store error: {source}")]
    Store { source: object_store::Error },
}

impl From<object_store::Error> for StageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StageError::NotFound { key: path },
            source => StageError::Store { source },
        }
    }
}
