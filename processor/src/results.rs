use data_model::{FileStatus, JobId};
use ledger::FileLedger;

use crate::{RouterError, RouterResult};

/// What a caller polling for a job result gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Pending { status: FileStatus },
    Failed { detail: String },
    /// Raw bytes of the result file, exactly as stored.
    Ready(Vec<u8>),
}

/// Looks up a job's record and, once processed, reads its result file.
/// Has no side effects.
pub async fn read_result(ledger: &FileLedger, job_id: &JobId) -> RouterResult<JobOutcome> {
    let file = ledger
        .get_by_job(job_id)
        .await
        .ok_or_else(|| RouterError::JobNotFound(job_id.clone()))?;

    match (file.status, file.result_path) {
        (FileStatus::Failed, _) => Ok(JobOutcome::Failed {
            detail: file.failure_detail.unwrap_or_default(),
        }),
        (FileStatus::Processed, Some(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| RouterError::ResultIo { path, source })?;
            Ok(JobOutcome::Ready(bytes))
        }
        (status, _) => Ok(JobOutcome::Pending { status }),
    }
}
