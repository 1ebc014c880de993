use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{local::LocalFileSystem, path::Path as ObjectPath, ObjectStore, PutPayload};
use opentelemetry::KeyValue;
use tracing::{debug, info};
use url::Url;

use crate::{
    new_object_key,
    read_source,
    sha256_hex,
    validate_ttl,
    write_destination,
    Access,
    ObjectStage,
    StageError,
    StageMetrics,
    StageResult,
    StagedObject,
    Timer,
};

/// Object stage backed by a directory on the local filesystem.
///
/// Signed URLs are plain `file://` URLs and never expire; the TTL is only
/// validated.
pub struct LocalObjectStage {
    store: LocalFileSystem,
    metrics: StageMetrics,
}

impl LocalObjectStage {
    pub fn new(root: &Path) -> StageResult<Self> {
        std::fs::create_dir_all(root).map_err(|source| StageError::LocalIo {
            path: root.to_path_buf(),
            source,
        })?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store,
            metrics: StageMetrics::from_global(),
        })
    }

    fn observe<T>(&self, operation: &'static str, result: &StageResult<T>) {
        if result.is_err() {
            self.metrics.record_error(operation);
        }
    }
}

#[async_trait]
impl ObjectStage for LocalObjectStage {
    async fn upload(&self, local_path: &Path) -> StageResult<StagedObject> {
        let _timer = Timer::start_with_labels(
            &self.metrics.operations,
            &[KeyValue::new("operation", "upload")],
        );
        let result = async {
            let bytes = read_source(local_path).await?;
            let object_key = new_object_key(local_path);
            let size_bytes = bytes.len() as u64;
            let sha256_hash = sha256_hex(&bytes);
            self.store
                .put(&ObjectPath::from(object_key.as_str()), PutPayload::from(bytes))
                .await?;
            info!(object_key = object_key.as_str(), size_bytes, "staged local file");
            Ok(StagedObject {
                remote_ref: super::oss::object_urn(&format!("local:{}", object_key)),
                object_key,
                size_bytes,
                sha256_hash,
            })
        }
        .await;
        self.observe("upload", &result);
        result
    }

    async fn signed_url(
        &self,
        object_key: &str,
        access: Access,
        ttl: Duration,
    ) -> StageResult<String> {
        let result = async {
            validate_ttl(ttl).map_err(StageError::InvalidTtl)?;
            let location = ObjectPath::from(object_key);
            if access == Access::Read {
                self.store.head(&location).await?;
            }
            let path = self.store.path_to_filesystem(&location)?;
            let url = Url::from_file_path(&path).map_err(|_| StageError::InvalidUrl {
                url: path.display().to_string(),
                reason: "not an absolute path".to_string(),
            })?;
            debug!(object_key, %access, "issued file url");
            Ok(url.to_string())
        }
        .await;
        self.observe("signed_url", &result);
        result
    }

    async fn download(&self, object_key: &str, destination: &Path) -> StageResult<()> {
        let _timer = Timer::start_with_labels(
            &self.metrics.operations,
            &[KeyValue::new("operation", "download")],
        );
        let result = async {
            let bytes: Bytes = self
                .store
                .get(&ObjectPath::from(object_key))
                .await?
                .bytes()
                .await?;
            write_destination(destination, &bytes).await
        }
        .await;
        self.observe("download", &result);
        result
    }
}
