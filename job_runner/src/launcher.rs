use std::{collections::BTreeMap, sync::Arc};

use data_model::{ArgumentBinding, WorkItemId};
use tracing::info;

use crate::{JobResult, WorkItemService};

/// Submits work items. Does not check that the activity suits the file.
#[derive(Clone)]
pub struct JobLauncher {
    service: Arc<dyn WorkItemService>,
}

impl JobLauncher {
    pub fn new(service: Arc<dyn WorkItemService>) -> Self {
        Self { service }
    }

    pub async fn launch(
        &self,
        activity_id: &str,
        argument_bindings: &BTreeMap<String, ArgumentBinding>,
    ) -> JobResult<WorkItemId> {
        let work_item_id = self.service.submit(activity_id, argument_bindings).await?;
        info!(
            activity_id,
            work_item_id = work_item_id.get(),
            arguments = argument_bindings.len(),
            "work item launched"
        );
        Ok(work_item_id)
    }
}
