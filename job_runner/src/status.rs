use std::fmt;

/// Status of a remote work item as reported by the job service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItemStatus {
    Pending,
    InProgress,
    Success,
    Cancelled,
    /// `failed` and every `failed*` refinement (`failedDownload`,
    /// `failedInstructions`, ...). Holds the raw status string.
    Failed(String),
    /// Anything the service reports that we do not recognise. Treated as
    /// still running.
    Other(String),
}

impl WorkItemStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => WorkItemStatus::Pending,
            "inprogress" => WorkItemStatus::InProgress,
            "success" => WorkItemStatus::Success,
            "cancelled" => WorkItemStatus::Cancelled,
            s if s.starts_with("failed") => WorkItemStatus::Failed(s.to_string()),
            s => WorkItemStatus::Other(s.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Success | WorkItemStatus::Cancelled | WorkItemStatus::Failed(_)
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::InProgress => "inprogress",
            WorkItemStatus::Success => "success",
            WorkItemStatus::Cancelled => "cancelled",
            WorkItemStatus::Failed(raw) | WorkItemStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: WorkItemStatus,
    /// Free-form detail the service attaches, empty when absent.
    pub detail: String,
}

impl StatusReport {
    pub fn new(status: WorkItemStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}
