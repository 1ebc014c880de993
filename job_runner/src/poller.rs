use std::{sync::Arc, time::Duration};

use data_model::WorkItemId;
use opentelemetry::{metrics::Counter, KeyValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{JobError, JobResult, StatusReport, WorkItemService, WorkItemStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Waits for work items to reach a terminal status.
///
/// Every iteration sleeps one interval first and only then queries the
/// service, so a work item that finishes instantly still costs one interval.
/// There is no overall deadline unless one is configured; the loop otherwise
/// ends only on a terminal status, a failed query, or cancellation.
#[derive(Clone)]
pub struct JobPoller {
    service: Arc<dyn WorkItemService>,
    interval: Duration,
    timeout: Option<Duration>,
    queries: Counter<u64>,
}

impl JobPoller {
    pub fn new(service: Arc<dyn WorkItemService>) -> Self {
        let queries = opentelemetry::global::meter("job_runner")
            .u64_counter("work_item_status_queries_total")
            .with_description("Status queries issued against the job service")
            .build();
        Self {
            service,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            queries,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the final report on `success`; `failed*` and `cancelled`
    /// surface as [`JobError::Failed`] carrying the service's detail string.
    pub async fn await_completion(
        &self,
        work_item_id: &WorkItemId,
        cancel: &CancellationToken,
    ) -> JobResult<StatusReport> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut attempts: u32 = 0;

        loop {
            let wake = match deadline {
                Some(deadline) => (Instant::now() + self.interval).min(deadline),
                None => Instant::now() + self.interval,
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(work_item_id = work_item_id.get(), attempts, "stopped waiting for work item");
                    return Err(JobError::Cancelled(work_item_id.clone()));
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    return Err(JobError::TimedOut(work_item_id.clone(), timeout));
                }
            }

            attempts += 1;
            let report = self.service.status(work_item_id).await;
            self.queries.add(
                1,
                &[KeyValue::new("outcome", if report.is_ok() { "ok" } else { "error" })],
            );
            let report = report?;
            debug!(
                work_item_id = work_item_id.get(),
                attempts,
                status = %report.status,
                "polled work item"
            );

            match &report.status {
                WorkItemStatus::Success => return Ok(report),
                WorkItemStatus::Failed(_) | WorkItemStatus::Cancelled => {
                    return Err(JobError::Failed {
                        work_item_id: work_item_id.clone(),
                        status: report.status.to_string(),
                        detail: report.detail,
                    });
                }
                WorkItemStatus::Pending | WorkItemStatus::InProgress | WorkItemStatus::Other(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, VecDeque},
        sync::Mutex,
    };

    use async_trait::async_trait;
    use data_model::ArgumentBinding;

    use super::*;

    /// Replays a fixed sequence of status answers and counts queries.
    struct ScriptedService {
        script: Mutex<VecDeque<JobResult<StatusReport>>>,
        queries: Mutex<Vec<Instant>>,
    }

    impl ScriptedService {
        fn new(script: Vec<JobResult<StatusReport>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn reports(statuses: &[&str]) -> Arc<Self> {
            Self::new(
                statuses
                    .iter()
                    .map(|s| Ok(StatusReport::new(WorkItemStatus::parse(s), "")))
                    .collect(),
            )
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WorkItemService for ScriptedService {
        async fn submit(
            &self,
            _activity_id: &str,
            _arguments: &BTreeMap<String, ArgumentBinding>,
        ) -> JobResult<WorkItemId> {
            Ok(WorkItemId::from("w1"))
        }

        async fn status(&self, _work_item_id: &WorkItemId) -> JobResult<StatusReport> {
            self.queries.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StatusReport::new(WorkItemStatus::InProgress, "")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_success() {
        let service = ScriptedService::reports(&["inprogress", "inprogress", "success"]);
        let poller = JobPoller::new(service.clone());
        let start = Instant::now();

        let report = poller
            .await_completion(&WorkItemId::from("w1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, WorkItemStatus::Success);
        assert_eq!(service.query_count(), 3);
        let queries = service.queries.lock().unwrap().clone();
        assert_eq!(queries[0] - start, DEFAULT_POLL_INTERVAL);
        assert_eq!(queries[2] - start, DEFAULT_POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_carries_detail() {
        let service = ScriptedService::new(vec![
            Ok(StatusReport::new(WorkItemStatus::Pending, "")),
            Ok(StatusReport::new(
                WorkItemStatus::parse("failed"),
                "Revit crashed while opening model",
            )),
        ]);
        let poller = JobPoller::new(service.clone());

        let err = poller
            .await_completion(&WorkItemId::from("w1"), &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            JobError::Failed { status, detail, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(detail, "Revit crashed while opening model");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "work item w1 ended with status failed: Revit crashed while opening model"
        );
        assert_eq!(service.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_work_item_is_failure() {
        let service = ScriptedService::reports(&["cancelled"]);
        let err = JobPoller::new(service)
            .await_completion(&WorkItemId::from("w1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Failed { status, .. } if status == "cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_is_not_retried() {
        let service = ScriptedService::new(vec![Err(JobError::Poll {
            work_item_id: WorkItemId::from("w1"),
            reason: "status query returned 500: boom".to_string(),
        })]);
        let err = JobPoller::new(service.clone())
            .await_completion(&WorkItemId::from("w1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Poll { .. }));
        assert_eq!(service.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_sleep() {
        let service = ScriptedService::reports(&[]);
        let poller = JobPoller::new(service.clone());
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                poller
                    .await_completion(&WorkItemId::from("w1"), &cancel)
                    .await
            })
        };
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2 + Duration::from_secs(1)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(service.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let service = ScriptedService::reports(&[]);
        let poller = JobPoller::new(service.clone())
            .with_interval(Duration::from_secs(5))
            .with_timeout(Some(Duration::from_secs(12)));

        let err = poller
            .await_completion(&WorkItemId::from("w1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::TimedOut(_, t) if t == Duration::from_secs(12)));
        assert_eq!(service.query_count(), 2);
    }
}
