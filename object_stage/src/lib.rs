//! Staging of plan files into remote object storage.
//!
//! The [`ObjectStage`] trait is what the pipeline router talks to: push a
//! local file into the bucket, hand out time-limited signed URLs for the job
//! bindings, and pull a produced object back to disk. Two backends are
//! provided:
//!
//! - [`OssObjectStage`] talks to the bucket REST API with bearer tokens taken
//!   from an injected [`credentials::TokenProvider`].
//! - [`LocalObjectStage`] keeps objects under a local directory and hands out
//!   `file://` URLs, for development against a local job runner.

mod backends;
mod error;
mod metrics;
mod signed;

use std::path::Path;

use async_trait::async_trait;
pub use backends::{
    local::LocalObjectStage,
    oss::{object_urn, OssConfig, OssObjectStage, DEFAULT_OSS_SCOPE},
};
pub use error::{StageError, StageResult};
pub use metrics::{StageMetrics, Timer};
pub use signed::{
    validate_ttl,
    Access,
    DOWNLOAD_URL_TTL,
    JOB_BINDING_URL_TTL,
    MAX_SIGNED_URL_TTL,
};

/// Result of staging a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    /// Opaque handle for the staged object (a URN for the remote store).
    pub remote_ref: String,
    pub object_key: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

#[async_trait]
pub trait ObjectStage: Send + Sync {
    /// Upload a local file under a freshly generated object key.
    ///
    /// Not retried: a rejected write surfaces as a [`StageError`] and the
    /// caller decides what happens next.
    async fn upload(&self, local_path: &Path) -> StageResult<StagedObject>;

    /// Request a capability-scoped URL for one object.
    async fn signed_url(
        &self,
        object_key: &str,
        access: Access,
        ttl: std::time::Duration,
    ) -> StageResult<String>;

    /// Fetch an object through a short-lived read URL and write it to
    /// `destination`, creating parent directories as needed.
    async fn download(&self, object_key: &str, destination: &Path) -> StageResult<()>;
}

/// Object keys are `<uuid>_<file name>` so two uploads never collide.
pub fn new_object_key(local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    format!("{}_{}", uuid::Uuid::new_v4(), file_name)
}

pub(crate) async fn write_destination(destination: &Path, bytes: &[u8]) -> StageResult<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StageError::LocalIo {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(destination, bytes)
        .await
        .map_err(|source| StageError::LocalIo {
            path: destination.to_path_buf(),
            source,
        })
}

pub(crate) async fn read_source(local_path: &Path) -> StageResult<Vec<u8>> {
    tokio::fs::read(local_path)
        .await
        .map_err(|source| StageError::LocalIo {
            path: local_path.to_path_buf(),
            source,
        })
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
