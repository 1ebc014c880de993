use std::path::PathBuf;

use data_model::{FileId, FileKind, FileStatus, JobId};
use job_runner::JobError;
use ledger::LedgerError;
use object_stage::StageError;

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("file {id} cannot be routed from status {status}")]
    NotRoutable { id: FileId, status: FileStatus },

    #[error("no activity configured for {0}")]
    NoActivity(FileKind),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("result file {path:?} is not a rooms document: {source}")]
    InvalidResult {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("result file {path:?}: {source}")]
    ResultIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
