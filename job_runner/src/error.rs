use credentials::AuthError;
use data_model::WorkItemId;

pub type JobResult<T> = Result<T, JobError>;

/// Errors from submitting or watching a work item. None are retried.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("work item launch failed ({status}): {body}")]
    Launch { status: u16, body: String },

    #[error("polling work item {work_item_id} failed: {reason}")]
    Poll {
        work_item_id: WorkItemId,
        reason: String,
    },

    #[error("work item {work_item_id} ended with status {status}: {detail}")]
    Failed {
        work_item_id: WorkItemId,
        status: String,
        detail: String,
    },

    #[error("waiting for work item {0} was cancelled")]
    Cancelled(WorkItemId),

    #[error("work item {0} did not finish within {1:?}")]
    TimedOut(WorkItemId, std::time::Duration),

    #[error("job service authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("job service transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid job service url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled(_))
    }
}
