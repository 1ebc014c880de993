//! Bucket REST API backend.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use credentials::TokenProvider;
use opentelemetry::KeyValue;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{
    new_object_key,
    read_source,
    sha256_hex,
    signed::ttl_minutes,
    validate_ttl,
    write_destination,
    Access,
    ObjectStage,
    StageError,
    StageMetrics,
    StageResult,
    StagedObject,
    Timer,
    DOWNLOAD_URL_TTL,
};

pub const DEFAULT_OSS_SCOPE: &str = "data:read data:write bucket:read bucket:create";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OssConfig {
    /// Base URL of the object storage API, e.g. `https://host/oss/v2`.
    pub base_url: String,
    pub bucket: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    DEFAULT_OSS_SCOPE.to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    object_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlRequest {
    minutes_expiration: u64,
    single_use: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlResponse {
    signed_url: String,
}

/// URN for a staged object: its object id, base64 encoded without padding.
pub fn object_urn(object_id: &str) -> String {
    STANDARD_NO_PAD.encode(object_id.as_bytes())
}

pub struct OssObjectStage {
    http: reqwest::Client,
    config: OssConfig,
    tokens: Arc<dyn TokenProvider>,
    metrics: StageMetrics,
}

impl OssObjectStage {
    pub fn new(http: reqwest::Client, config: OssConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            config,
            tokens,
            metrics: StageMetrics::from_global(),
        }
    }

    fn object_url(&self, object_key: &str, suffix: Option<&str>) -> StageResult<Url> {
        let invalid = |reason: String| StageError::InvalidUrl {
            url: self.config.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.config.base_url).map_err(|e| invalid(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid("base url cannot carry a path".to_string()))?;
            segments
                .pop_if_empty()
                .extend(["buckets", self.config.bucket.as_str(), "objects", object_key]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn bearer(&self) -> StageResult<String> {
        Ok(self.tokens.get_token(&self.config.scope).await?)
    }

    async fn upload_impl(&self, local_path: &Path) -> StageResult<StagedObject> {
        let bytes = read_source(local_path).await?;
        let object_key = new_object_key(local_path);
        let size_bytes = bytes.len() as u64;
        let sha256_hash = sha256_hex(&bytes);

        let url = self.object_url(&object_key, None)?;
        let token = self.bearer().await?;
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let response = check_response("upload", &object_key, response).await?;
        let payload: UploadResponse = response.json().await?;

        info!(
            object_key = object_key.as_str(),
            size_bytes, "staged local file into bucket"
        );
        Ok(StagedObject {
            remote_ref: object_urn(&payload.object_id),
            object_key,
            size_bytes,
            sha256_hash,
        })
    }

    async fn signed_url_impl(
        &self,
        object_key: &str,
        access: Access,
        ttl: Duration,
    ) -> StageResult<String> {
        validate_ttl(ttl).map_err(StageError::InvalidTtl)?;
        let mut url = self.object_url(object_key, Some("signed"))?;
        url.query_pairs_mut().append_pair("access", access.as_str());

        let token = self.bearer().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&SignedUrlRequest {
                minutes_expiration: ttl_minutes(ttl),
                single_use: false,
            })
            .send()
            .await?;
        let response = check_response("signed url", object_key, response).await?;
        let payload: SignedUrlResponse = response.json().await?;
        debug!(object_key, %access, "issued signed url");
        Ok(payload.signed_url)
    }

    async fn download_impl(&self, object_key: &str, destination: &Path) -> StageResult<()> {
        let url = self
            .signed_url_impl(object_key, Access::Read, DOWNLOAD_URL_TTL)
            .await?;
        let response = self.http.get(url).send().await?;
        let response = check_response("download", object_key, response).await?;
        let bytes = response.bytes().await?;
        write_destination(destination, &bytes).await?;
        info!(
            object_key,
            destination = %destination.display(),
            size_bytes = bytes.len(),
            "downloaded object"
        );
        Ok(())
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = StageResult<T>>,
    ) -> StageResult<T> {
        let _timer = Timer::start_with_labels(
            &self.metrics.operations,
            &[KeyValue::new("operation", operation)],
        );
        let result = fut.await;
        if result.is_err() {
            self.metrics.record_error(operation);
        }
        result
    }
}

async fn check_response(
    operation: &'static str,
    object_key: &str,
    response: reqwest::Response,
) -> StageResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StageError::NotFound {
            key: object_key.to_string(),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(StageError::Rejected {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ObjectStage for OssObjectStage {
    async fn upload(&self, local_path: &Path) -> StageResult<StagedObject> {
        self.timed("upload", self.upload_impl(local_path)).await
    }

    async fn signed_url(
        &self,
        object_key: &str,
        access: Access,
        ttl: Duration,
    ) -> StageResult<String> {
        self.timed("signed_url", self.signed_url_impl(object_key, access, ttl))
            .await
    }

    async fn download(&self, object_key: &str, destination: &Path) -> StageResult<()> {
        self.timed("download", self.download_impl(object_key, destination))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use axum::{
        body::Bytes,
        extract::{Path as UrlPath, Query, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post, put},
        Json,
        Router,
    };
    use credentials::{AuthResult, TokenProvider};
    use serde_json::{json, Value};

    use super::*;
    use crate::JOB_BINDING_URL_TTL;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn get_token(&self, _scope: &str) -> AuthResult<String> {
            Ok("test-token".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct FakeBucket {
        base: Arc<Mutex<String>>,
        objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        signed_requests: Arc<Mutex<Vec<(String, String, Value)>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "Bearer test-token")
            .unwrap_or(false)
    }

    async fn put_object(
        State(bucket): State<FakeBucket>,
        UrlPath((name, key)): UrlPath<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"reason": "no token"})));
        }
        if name == "full-bucket" {
            return (StatusCode::FORBIDDEN, Json(json!({"reason": "quota exceeded"})));
        }
        bucket.objects.lock().unwrap().insert(key.clone(), body.to_vec());
        (
            StatusCode::OK,
            Json(json!({"objectId": format!("urn:oss:objects:{}/{}", name, key)})),
        )
    }

    async fn sign_object(
        State(bucket): State<FakeBucket>,
        UrlPath((_name, key)): UrlPath<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({})));
        }
        let access = query.get("access").cloned().unwrap_or_default();
        if access == "read" && !bucket.objects.lock().unwrap().contains_key(&key) {
            return (StatusCode::NOT_FOUND, Json(json!({"reason": "missing"})));
        }
        bucket
            .signed_requests
            .lock()
            .unwrap()
            .push((key.clone(), access, body));
        let base = bucket.base.lock().unwrap().clone();
        (
            StatusCode::OK,
            Json(json!({"signedUrl": format!("{}/download/{}", base, key)})),
        )
    }

    async fn fetch_object(
        State(bucket): State<FakeBucket>,
        UrlPath(key): UrlPath<String>,
    ) -> impl IntoResponse {
        match bucket.objects.lock().unwrap().get(&key) {
            Some(bytes) => (StatusCode::OK, bytes.clone()),
            None => (StatusCode::NOT_FOUND, Vec::new()),
        }
    }

    async fn serve(bucket: FakeBucket) -> String {
        let router = Router::new()
            .route("/oss/v2/buckets/{name}/objects/{key}", put(put_object))
            .route(
                "/oss/v2/buckets/{name}/objects/{key}/signed",
                post(sign_object),
            )
            .route("/download/{key}", get(fetch_object))
            .with_state(bucket.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let base = format!("http://{}", addr);
        *bucket.base.lock().unwrap() = base.clone();
        base
    }

    fn stage(base: &str, bucket: &str) -> OssObjectStage {
        OssObjectStage::new(
            reqwest::Client::new(),
            OssConfig {
                base_url: format!("{}/oss/v2", base),
                bucket: bucket.to_string(),
                scope: DEFAULT_OSS_SCOPE.to_string(),
            },
            Arc::new(StaticToken),
        )
    }

    #[test]
    fn test_object_urn_is_unpadded() {
        let urn = object_urn("urn:oss:objects:b/k.dwg");
        assert!(!urn.contains('='));
        assert_eq!(
            STANDARD_NO_PAD.decode(urn).unwrap(),
            b"urn:oss:objects:b/k.dwg".to_vec()
        );
    }

    #[tokio::test]
    async fn test_upload_sign_and_download() {
        let bucket = FakeBucket::default();
        let base = serve(bucket.clone()).await;
        let stage = stage(&base, "plans");

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plan.dwg");
        tokio::fs::write(&source, b"AC1032").await.unwrap();

        let staged = stage.upload(&source).await.unwrap();
        assert!(staged.object_key.ends_with("_plan.dwg"));
        assert_eq!(staged.size_bytes, 6);
        assert_eq!(
            STANDARD_NO_PAD.decode(&staged.remote_ref).unwrap(),
            format!("urn:oss:objects:plans/{}", staged.object_key).into_bytes()
        );

        let url = stage
            .signed_url(&staged.object_key, Access::Write, JOB_BINDING_URL_TTL)
            .await
            .unwrap();
        assert!(url.ends_with(&staged.object_key));

        let destination = dir.path().join("nested/out/plan.dwg");
        stage
            .download(&staged.object_key, &destination)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"AC1032");

        let requests = bucket.signed_requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1, "write");
        assert_eq!(requests[0].2["minutesExpiration"], 30);
        assert_eq!(requests[0].2["singleUse"], false);
        assert_eq!(requests[1].1, "read");
        assert_eq!(requests[1].2["minutesExpiration"], 15);
    }

    #[tokio::test]
    async fn test_rejected_upload_carries_body() {
        let base = serve(FakeBucket::default()).await;
        let stage = stage(&base, "full-bucket");

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plan.rvt");
        tokio::fs::write(&source, b"rvt").await.unwrap();

        match stage.upload(&source).await.unwrap_err() {
            StageError::Rejected {
                operation,
                status,
                body,
            } => {
                assert_eq!(operation, "upload");
                assert_eq!(status, 403);
                assert!(body.contains("quota exceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let base = serve(FakeBucket::default()).await;
        let stage = stage(&base, "plans");
        let dir = tempfile::tempdir().unwrap();

        let err = stage
            .download("job_1-rooms.json", &dir.path().join("out.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::NotFound { key } if key == "job_1-rooms.json"));
        assert!(!dir.path().join("out.json").exists());
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let stage = stage("http://127.0.0.1:9", "plans");
        let err = stage
            .upload(Path::new("/definitely/not/here.dwg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::LocalIo { .. }));
    }

    #[tokio::test]
    async fn test_invalid_ttl_is_rejected_before_request() {
        let stage = stage("http://127.0.0.1:9", "plans");
        let err = stage
            .signed_url("k", Access::Read, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidTtl(_)));
    }
}
