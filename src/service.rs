use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use credentials::{ClientCredentials, ClientCredentialsSource, TokenCache, TokenSource};
use job_runner::{DesignAutomationClient, DesignAutomationConfig, JobLauncher, JobPoller};
use ledger::FileLedger;
use object_stage::{LocalObjectStage, ObjectStage, OssConfig, OssObjectStage};
use processor::{PipelineRouter, PipelineSupervisor, RouterSettings};
use tokio::signal;
use tracing::{error, info};

use crate::{
    config::{ServerConfig, StageBackend},
    metrics::init_provider,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub router: PipelineRouter,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let ledger = Arc::new(
            FileLedger::open(&config.ledger_path)
                .await
                .context("error opening file ledger")?,
        );

        let http = reqwest::Client::builder()
            .build()
            .context("error building http client")?;
        let token_source: Arc<dyn TokenSource> = Arc::new(ClientCredentialsSource::new(
            http.clone(),
            &config.aps.auth_url,
            ClientCredentials {
                client_id: config.aps.client_id.clone(),
                client_secret: config.aps.client_secret.clone(),
            },
        ));

        let stage: Arc<dyn ObjectStage> = match config.stage.backend {
            StageBackend::Oss => Arc::new(OssObjectStage::new(
                http.clone(),
                OssConfig {
                    base_url: config.aps.oss_base_url.clone(),
                    bucket: config.aps.bucket.clone(),
                    scope: config.aps.oss_scope.clone(),
                },
                Arc::new(TokenCache::new(token_source.clone())),
            )),
            StageBackend::Local => Arc::new(
                LocalObjectStage::new(&config.stage.local_root)
                    .context("error initializing local object stage")?,
            ),
        };

        let work_items = Arc::new(DesignAutomationClient::new(
            http,
            DesignAutomationConfig {
                base_url: config.aps.da_base_url.clone(),
                scope: config.aps.da_scope.clone(),
            },
            Arc::new(TokenCache::new(token_source)),
        ));
        let poller = JobPoller::new(work_items.clone())
            .with_interval(config.pipeline.poll_interval())
            .with_timeout(config.pipeline.poll_timeout());

        let router = PipelineRouter::new(
            ledger,
            stage,
            JobLauncher::new(work_items),
            poller,
            PipelineSupervisor::new(config.pipeline.max_concurrent_jobs),
            RouterSettings {
                mode: config.pipeline.mode,
                results_dir: config.results_dir.clone(),
                activities: config.activities.clone(),
            },
        );

        Ok(Self { config, router })
    }

    pub async fn start(&self) -> Result<()> {
        let meter_provider = init_provider(&self.config.telemetry, env!("CARGO_PKG_VERSION"))?;

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!(
            mode = ?self.config.pipeline.mode,
            "server api listening on {}", self.config.listen_addr
        );
        let route_state = RouteState {
            router: self.router.clone(),
        };
        axum_server::bind(addr)
            .handle(handle)
            .serve(create_routes(route_state).into_make_service())
            .await?;

        info!(
            active_runs = self.router.supervisor().active_runs(),
            "cancelling pipeline runs"
        );
        self.router.shutdown().await;

        if let Some(provider) = meter_provider {
            if let Err(err) = provider.shutdown() {
                error!("error shutting down meter provider: {:?}", err);
            }
        }
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
