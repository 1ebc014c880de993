//! Submitting and watching work items on the remote job-execution service.

mod client;
mod error;
mod launcher;
mod poller;
mod status;

pub use client::{
    DesignAutomationClient,
    DesignAutomationConfig,
    WorkItemService,
    DEFAULT_DA_SCOPE,
};
pub use error::{JobError, JobResult};
pub use launcher::JobLauncher;
pub use poller::{JobPoller, DEFAULT_POLL_INTERVAL};
pub use status::{StatusReport, WorkItemStatus};
