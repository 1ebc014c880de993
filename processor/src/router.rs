use std::{path::PathBuf, sync::Arc, time::Instant};

use dashmap::{mapref::entry::Entry, DashMap};
use data_model::{
    ActivityTable,
    FileId,
    FileKind,
    FileStatus,
    JobId,
    RoomsPayload,
    StoredFile,
    WorkItemId,
    WorkItemLaunch,
};
use job_runner::{JobLauncher, JobPoller};
use ledger::FileLedger;
use object_stage::{Access, ObjectStage, JOB_BINDING_URL_TTL};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::{
    metrics::PipelineMetrics,
    stub,
    supervisor::PipelineSupervisor,
    RouterError,
    RouterResult,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Stage, launch and poll against the remote services.
    #[default]
    Remote,
    /// Write a synthetic result immediately.
    Stub,
}

/// Where a pipeline run is. Only `Processed` and `Failed` are visible in the
/// ledger as such; the others map onto Uploaded/Processing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Uploaded,
    Staged,
    Launched,
    Polling,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub job_id: JobId,
    pub pipeline: FileKind,
    pub status: FileStatus,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub mode: PipelineMode,
    pub results_dir: PathBuf,
    pub activities: ActivityTable,
}

type StageFailure = (PipelineStage, RouterError);

fn at<E: Into<RouterError>>(stage: PipelineStage) -> impl FnOnce(E) -> StageFailure {
    move |err| (stage, err.into())
}

/// Drives one file through stage, launch, poll and download, keeping its
/// ledger record in step.
#[derive(Clone)]
pub struct PipelineRouter {
    ledger: Arc<FileLedger>,
    stage: Arc<dyn ObjectStage>,
    launcher: JobLauncher,
    poller: JobPoller,
    supervisor: PipelineSupervisor,
    settings: Arc<RouterSettings>,
    metrics: PipelineMetrics,
    claims: Arc<DashMap<FileId, JobId>>,
}

/// Marks a file as being routed until dropped.
struct Claim {
    claims: Arc<DashMap<FileId, JobId>>,
    file_id: FileId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.remove(&self.file_id);
    }
}

impl PipelineRouter {
    pub fn new(
        ledger: Arc<FileLedger>,
        stage: Arc<dyn ObjectStage>,
        launcher: JobLauncher,
        poller: JobPoller,
        supervisor: PipelineSupervisor,
        settings: RouterSettings,
    ) -> Self {
        Self {
            ledger,
            stage,
            launcher,
            poller,
            supervisor,
            settings: Arc::new(settings),
            metrics: PipelineMetrics::new(),
            claims: Arc::new(DashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<FileLedger> {
        &self.ledger
    }

    pub fn supervisor(&self) -> &PipelineSupervisor {
        &self.supervisor
    }

    fn result_path(&self, job_id: &JobId) -> PathBuf {
        self.settings.results_dir.join(format!("{}.json", job_id))
    }

    fn claim(&self, file_id: &FileId, job_id: &JobId) -> RouterResult<Claim> {
        match self.claims.entry(file_id.clone()) {
            Entry::Occupied(_) => Err(RouterError::NotRoutable {
                id: file_id.clone(),
                status: FileStatus::Uploaded,
            }),
            Entry::Vacant(slot) => {
                slot.insert(job_id.clone());
                Ok(Claim {
                    claims: self.claims.clone(),
                    file_id: file_id.clone(),
                })
            }
        }
    }

    /// Routes an uploaded file to its pipeline.
    ///
    /// Returns once the work item is launched (or the run has already
    /// failed); polling and download continue in the background. Failures in
    /// the pipeline itself are recorded on the ledger and reported through
    /// `status`, not as an `Err`.
    #[instrument(skip_all, fields(file_id = file_id.get()))]
    pub async fn route(&self, file_id: &FileId) -> RouterResult<PipelineResult> {
        let job_id = JobId::generate();
        let _claim = self.claim(file_id, &job_id)?;

        let file = self
            .ledger
            .get(file_id)
            .await
            .ok_or_else(|| RouterError::FileNotFound(file_id.clone()))?;
        if file.status != FileStatus::Uploaded {
            return Err(RouterError::NotRoutable {
                id: file.id,
                status: file.status,
            });
        }

        let started = Instant::now();
        self.metrics.record_started(file.kind.as_ref());
        info!(job_id = job_id.get(), kind = %file.kind, "routing file");

        if self.settings.mode == PipelineMode::Stub {
            return self.run_stub(&file, job_id, started).await;
        }

        match self.stage_and_launch(&file, &job_id).await {
            Ok((launch, work_item_id)) => {
                let router = self.clone();
                let kind = file.kind;
                let file_id = file.id.clone();
                let run_job_id = job_id.clone();
                self.supervisor.spawn(job_id.clone(), move |cancel| {
                    router.complete(file_id, kind, run_job_id, work_item_id, launch, started, cancel)
                });
                Ok(PipelineResult {
                    job_id,
                    pipeline: file.kind,
                    status: FileStatus::Processing,
                })
            }
            Err((stage, err)) => {
                self.fail(&file.id, file.kind, &job_id, stage, &err, started)
                    .await?;
                Ok(PipelineResult {
                    job_id,
                    pipeline: file.kind,
                    status: FileStatus::Failed,
                })
            }
        }
    }

    /// Cancels a running pipeline. Returns false when the job exists but has
    /// no background run (already finished, or never launched).
    pub async fn cancel(&self, job_id: &JobId) -> RouterResult<bool> {
        if self.ledger.get_by_job(job_id).await.is_none() {
            return Err(RouterError::JobNotFound(job_id.clone()));
        }
        Ok(self.supervisor.cancel(job_id))
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    async fn stage_and_launch(
        &self,
        file: &StoredFile,
        job_id: &JobId,
    ) -> Result<(WorkItemLaunch, WorkItemId), StageFailure> {
        let activity = self
            .settings
            .activities
            .lookup(file.kind)
            .cloned()
            .ok_or((PipelineStage::Uploaded, RouterError::NoActivity(file.kind)))?;

        let staged = self
            .stage
            .upload(&file.local_path)
            .await
            .map_err(at(PipelineStage::Uploaded))?;
        self.ledger
            .update(&file.id, |f| {
                f.remote_ref = Some(staged.remote_ref.clone());
                f.object_key = Some(staged.object_key.clone());
            })
            .await
            .map_err(at(PipelineStage::Uploaded))?;
        info!(
            job_id = job_id.get(),
            object_key = staged.object_key.as_str(),
            "file staged"
        );

        let output_object_key = format!("{}-rooms.json", job_id);
        let input_url = self
            .stage
            .signed_url(&staged.object_key, Access::Read, JOB_BINDING_URL_TTL)
            .await
            .map_err(at(PipelineStage::Staged))?;
        let output_url = self
            .stage
            .signed_url(&output_object_key, Access::Write, JOB_BINDING_URL_TTL)
            .await
            .map_err(at(PipelineStage::Staged))?;

        let launch = WorkItemLaunch::new(
            &activity,
            input_url,
            output_url,
            output_object_key,
            self.result_path(job_id),
        );
        let work_item_id = self
            .launcher
            .launch(&launch.activity_id, &launch.argument_bindings)
            .await
            .map_err(at(PipelineStage::Staged))?;

        self.ledger
            .update(&file.id, |f| {
                f.job_id = Some(job_id.clone());
                f.work_item_id = Some(work_item_id.clone());
                f.status = FileStatus::Processing;
            })
            .await
            .map_err(at(PipelineStage::Launched))?;

        Ok((launch, work_item_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        self,
        file_id: FileId,
        kind: FileKind,
        job_id: JobId,
        work_item_id: WorkItemId,
        launch: WorkItemLaunch,
        started: Instant,
        cancel: CancellationToken,
    ) -> RouterResult<()> {
        let outcome = match self.collect(&work_item_id, &launch, &cancel).await {
            Ok(()) => self
                .mark_processed(&file_id, &launch)
                .await
                .map_err(at(PipelineStage::Processed)),
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(()) => {
                self.metrics
                    .record_finished(kind.as_ref(), None, started.elapsed().as_secs_f64());
                info!(
                    file_id = file_id.get(),
                    job_id = job_id.get(),
                    result_path = %launch.result_path.display(),
                    "pipeline processed"
                );
                Ok(())
            }
            Err((_, RouterError::Job(err)))
                if err.is_cancelled() && self.supervisor.is_shutting_down() =>
            {
                // The remote work item is still running; keep the record Processing.
                info!(
                    file_id = file_id.get(),
                    job_id = job_id.get(),
                    work_item_id = work_item_id.get(),
                    "shutting down, leaving pipeline processing"
                );
                Ok(())
            }
            Err((stage, err)) => {
                self.fail(&file_id, kind, &job_id, stage, &err, started)
                    .await?;
                Err(err)
            }
        }
    }

    async fn mark_processed(
        &self,
        file_id: &FileId,
        launch: &WorkItemLaunch,
    ) -> RouterResult<()> {
        let result_path = launch.result_path.clone();
        self.ledger
            .update(file_id, |f| {
                f.status = FileStatus::Processed;
                f.result_path = Some(result_path);
            })
            .await?;
        Ok(())
    }

    /// Waits for the work item, then downloads and checks its output.
    async fn collect(
        &self,
        work_item_id: &WorkItemId,
        launch: &WorkItemLaunch,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        self.poller
            .await_completion(work_item_id, cancel)
            .await
            .map_err(at(PipelineStage::Polling))?;

        self.stage
            .download(&launch.output_object_key, &launch.result_path)
            .await
            .map_err(at(PipelineStage::Polling))?;

        let path = &launch.result_path;
        let bytes = tokio::fs::read(path).await.map_err(|source| {
            (
                PipelineStage::Polling,
                RouterError::ResultIo {
                    path: path.clone(),
                    source,
                },
            )
        })?;
        if let Err(source) = serde_json::from_slice::<RoomsPayload>(&bytes) {
            if let Err(err) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %err, "could not remove invalid result");
            }
            return Err((
                PipelineStage::Polling,
                RouterError::InvalidResult {
                    path: path.clone(),
                    source,
                },
            ));
        }
        Ok(())
    }

    async fn run_stub(
        &self,
        file: &StoredFile,
        job_id: JobId,
        started: Instant,
    ) -> RouterResult<PipelineResult> {
        let result_path = self.result_path(&job_id);
        if let Err(err) = stub::write_synthetic_result(file, &result_path).await {
            self.fail(&file.id, file.kind, &job_id, PipelineStage::Uploaded, &err, started)
                .await?;
            return Ok(PipelineResult {
                job_id,
                pipeline: file.kind,
                status: FileStatus::Failed,
            });
        }

        self.ledger
            .update(&file.id, |f| {
                f.job_id = Some(job_id.clone());
                f.status = FileStatus::Processed;
                f.result_path = Some(result_path);
            })
            .await?;
        self.metrics
            .record_finished(file.kind.as_ref(), None, started.elapsed().as_secs_f64());
        info!(job_id = job_id.get(), "wrote synthetic result");
        Ok(PipelineResult {
            job_id,
            pipeline: file.kind,
            status: FileStatus::Processed,
        })
    }

    async fn fail(
        &self,
        file_id: &FileId,
        kind: FileKind,
        job_id: &JobId,
        stage: PipelineStage,
        err: &RouterError,
        started: Instant,
    ) -> RouterResult<()> {
        let detail = err.to_string();
        warn!(
            file_id = file_id.get(),
            job_id = job_id.get(),
            failed_at = %stage,
            error = detail.as_str(),
            "pipeline failed"
        );
        self.metrics
            .record_finished(kind.as_ref(), Some(stage), started.elapsed().as_secs_f64());

        if let Err(ledger_err) = self
            .ledger
            .update(file_id, |f| f.mark_failed(job_id, detail.clone()))
            .await
        {
            error!(
                file_id = file_id.get(),
                job_id = job_id.get(),
                error = %ledger_err,
                "failed to record pipeline failure"
            );
            return Err(ledger_err.into());
        }
        Ok(())
    }
}
