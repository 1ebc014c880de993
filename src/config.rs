use std::{fmt, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use data_model::ActivityTable;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use job_runner::DEFAULT_DA_SCOPE;
use object_stage::DEFAULT_OSS_SCOPE;
use processor::{PipelineMode, DEFAULT_MAX_CONCURRENT_JOBS};
use serde::{Deserialize, Serialize};

/// Environment variables with this prefix override file settings. Nested
/// keys are separated by `__`, e.g. `PLAN_APS__CLIENT_SECRET`.
pub const ENV_PREFIX: &str = "PLAN_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub ledger_path: PathBuf,
    pub results_dir: PathBuf,
    pub structured_logging: bool,
    pub pipeline: PipelineConfig,
    pub aps: ApsConfig,
    pub stage: StageConfig,
    pub activities: ActivityTable,
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:8910".to_string(),
            ledger_path: PathBuf::from("data/ledger.json"),
            results_dir: PathBuf::from("data/jobs"),
            structured_logging: false,
            pipeline: PipelineConfig::default(),
            aps: ApsConfig::default(),
            stage: StageConfig::default(),
            activities: ActivityTable::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub max_concurrent_jobs: usize,
    pub poll_interval_secs: u64,
    /// Unset means wait for the work item indefinitely.
    pub poll_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Remote,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            poll_interval_secs: 5,
            poll_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }
}

/// Credentials and endpoints of the remote platform.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApsConfig {
    pub client_id: String,
    pub client_secret: String,
    pub bucket: String,
    pub auth_url: String,
    pub oss_base_url: String,
    pub da_base_url: String,
    pub oss_scope: String,
    pub da_scope: String,
}

impl Default for ApsConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            bucket: String::new(),
            auth_url: "https://developer.api.autodesk.com/authentication/v2/token".to_string(),
            oss_base_url: "https://developer.api.autodesk.com/oss/v2".to_string(),
            da_base_url: "https://developer.api.autodesk.com/da/us-east/v3".to_string(),
            oss_scope: DEFAULT_OSS_SCOPE.to_string(),
            da_scope: DEFAULT_DA_SCOPE.to_string(),
        }
    }
}

impl fmt::Debug for ApsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApsConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("auth_url", &self.auth_url)
            .field("oss_base_url", &self.oss_base_url)
            .field("da_base_url", &self.da_base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageBackend {
    #[default]
    Oss,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageConfig {
    pub backend: StageBackend,
    /// Root directory for the local backend.
    pub local_root: PathBuf,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            backend: StageBackend::Oss,
            local_root: PathBuf::from("data/objects"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enable_metrics: bool,
    /// OTLP collector endpoint; the exporter default when unset.
    pub endpoint: Option<String>,
    pub metrics_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            metrics_interval_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the YAML file (if any), then `PLAN_` environment
    /// variables.
    pub fn load(path: Option<&std::path::Path>) -> Result<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("error reading config file {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment.extract().context("error parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn structured_logging(&self) -> bool {
        self.structured_logging
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(anyhow!("pipeline.max_concurrent_jobs must be greater than 0"));
        }
        if self.pipeline.poll_interval_secs == 0 {
            return Err(anyhow!("pipeline.poll_interval_secs must be greater than 0"));
        }
        if self.pipeline.poll_timeout_secs == Some(0) {
            return Err(anyhow!("pipeline.poll_timeout_secs must be greater than 0"));
        }
        if self.pipeline.mode == PipelineMode::Remote {
            if self.aps.client_id.is_empty() || self.aps.client_secret.is_empty() {
                return Err(anyhow!(
                    "remote pipeline mode requires aps.client_id and aps.client_secret"
                ));
            }
            if self.stage.backend == StageBackend::Oss && self.aps.bucket.is_empty() {
                return Err(anyhow!("the oss stage backend requires aps.bucket"));
            }
        }
        Ok(())
    }
}
