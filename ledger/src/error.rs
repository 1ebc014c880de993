use std::path::PathBuf;

use data_model::{FileId, InvariantViolation, JobId};

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    #[error("file {0} not found in ledger")]
    NotFound(FileId),

    #[error("file {0} already exists in ledger")]
    Duplicate(FileId),

    #[error("job {job_id} is already assigned to file {file_id}")]
    JobIdInUse { job_id: JobId, file_id: FileId },

    #[error("rejected ledger update: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("ledger io on {path:?} failed. error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode ledger file {path:?}. error: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ledger. error: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}
