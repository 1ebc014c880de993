use std::path::Path as FsPath;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
    Router,
};
use data_model::{FileId, JobId, StoredFile, StoredFileBuilder};
use processor::{read_result, JobOutcome, PipelineResult, PipelineRouter};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::http_objects::{
    ApiError,
    CancelledJob,
    FailedResult,
    PendingResult,
    ProcessFile,
    RegisterFile,
    RegisteredFile,
    ResultQuery,
};

#[derive(Clone)]
pub struct RouteState {
    pub router: PipelineRouter,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/plan/files", post(register_file))
        .route("/plan/files/{id}", get(get_file))
        .route("/plan/process", post(process_file))
        .route("/plan/result", get(get_result))
        .route("/plan/jobs/{job_id}/cancel", post(cancel_job))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(route_state)
}

async fn register_file(
    State(state): State<RouteState>,
    Json(payload): Json<RegisterFile>,
) -> Result<Json<RegisteredFile>, ApiError> {
    let ext = FsPath::new(&payload.original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let mut builder = StoredFileBuilder::default();
    builder
        .original_name(payload.original_name)
        .ext(ext)
        .size_bytes(payload.size_bytes.unwrap_or_default())
        .local_path(payload.local_path)
        .kind(payload.kind);
    if let Some(id) = payload.id {
        builder.id(FileId::new(id));
    }
    if let Some(mime_type) = payload.mime_type {
        builder.mime_type(mime_type);
    }
    let file: StoredFile = builder
        .build()
        .map_err(|e| ApiError::bad_request(&e.to_string()))?;

    let file = state.router.ledger().create(file).await?;
    info!(file_id = file.id.get(), kind = %file.kind, "registered file");
    Ok(Json(RegisteredFile {
        file_id: file.id,
        kind: file.kind,
    }))
}

async fn get_file(
    State(state): State<RouteState>,
    Path(id): Path<String>,
) -> Result<Json<StoredFile>, ApiError> {
    let file_id = FileId::new(id);
    state
        .router
        .ledger()
        .get(&file_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&format!("file {} not found", file_id)))
}

async fn process_file(
    State(state): State<RouteState>,
    Json(payload): Json<ProcessFile>,
) -> Result<Json<PipelineResult>, ApiError> {
    let result = state
        .router
        .route(&FileId::new(payload.file_id))
        .await?;
    Ok(Json(result))
}

async fn get_result(
    State(state): State<RouteState>,
    Query(query): Query<ResultQuery>,
) -> Result<Response, ApiError> {
    let job_id = query
        .job_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("query parameter jobId is required"))?;

    let response = match read_result(state.router.ledger(), &JobId::new(job_id)).await? {
        JobOutcome::Ready(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        JobOutcome::Pending { status } => (
            StatusCode::ACCEPTED,
            Json(PendingResult {
                status,
                message: "processing".to_string(),
            }),
        )
            .into_response(),
        JobOutcome::Failed { detail } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(FailedResult {
                status: data_model::FileStatus::Failed,
                detail,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn cancel_job(
    State(state): State<RouteState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelledJob>, ApiError> {
    let job_id = JobId::new(job_id);
    let cancelled = state.router.cancel(&job_id).await?;
    Ok(Json(CancelledJob { job_id, cancelled }))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use data_model::{ActivityTable, ArgumentBinding, FileStatus, WorkItemId};
    use job_runner::{
        JobLauncher,
        JobPoller,
        JobResult,
        StatusReport,
        WorkItemService,
        WorkItemStatus,
    };
    use ledger::FileLedger;
    use object_stage::LocalObjectStage;
    use processor::{PipelineMode, PipelineSupervisor, RouterSettings};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct IdleService;

    #[async_trait]
    impl WorkItemService for IdleService {
        async fn submit(
            &self,
            _activity_id: &str,
            _arguments: &BTreeMap<String, ArgumentBinding>,
        ) -> JobResult<WorkItemId> {
            Ok(WorkItemId::from("w1"))
        }

        async fn status(&self, _work_item_id: &WorkItemId) -> JobResult<StatusReport> {
            Ok(StatusReport::new(WorkItemStatus::InProgress, ""))
        }
    }

    async fn test_app(dir: &tempfile::TempDir) -> (Router, PipelineRouter) {
        let ledger = Arc::new(
            FileLedger::open(dir.path().join("ledger.json"))
                .await
                .unwrap(),
        );
        let service = Arc::new(IdleService);
        let router = PipelineRouter::new(
            ledger,
            Arc::new(LocalObjectStage::new(&dir.path().join("objects")).unwrap()),
            JobLauncher::new(service.clone()),
            JobPoller::new(service).with_interval(Duration::from_millis(10)),
            PipelineSupervisor::new(2),
            RouterSettings {
                mode: PipelineMode::Stub,
                results_dir: dir.path().join("jobs"),
                activities: ActivityTable::default(),
            },
        );
        let app = create_routes(RouteState {
            router: router.clone(),
        });
        (app, router)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, id: &str, name: &str, kind: &str) -> (StatusCode, Value) {
        send(
            app,
            Method::POST,
            "/plan/files",
            Some(json!({
                "id": id,
                "originalName": name,
                "localPath": format!("/tmp/uploads/{}", name),
                "kind": kind,
            })),
        )
        .await
    }

    #[tokio::test]
    async fn test_register_process_and_fetch_result() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _router) = test_app(&dir).await;

        let (status, body) = register(&app, "f1", "Ground Floor.DWG", "DWG").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"fileId": "f1", "kind": "DWG"}));

        let (status, body) = send(&app, Method::GET, "/plan/files/f1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "uploaded");
        assert_eq!(body["ext"], ".dwg");
        assert_eq!(body["mimeType"], "application/octet-stream");

        let (status, body) = send(
            &app,
            Method::POST,
            "/plan/process",
            Some(json!({"fileId": "f1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pipeline"], "DWG");
        assert_eq!(body["status"], "processed");
        let job_id = body["jobId"].as_str().unwrap().to_string();
        assert!(job_id.starts_with("job_"));

        let uri = format!("/plan/result?jobId={}", job_id);
        let (status, first) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["fileId"], "f1");
        assert_eq!(first["rooms"][0]["name"], "Ground Floor-Room-1");
        let (_, second) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(first, second);

        let (status, body) = send(&app, Method::GET, "/plan/files/f1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
        assert_eq!(body["jobId"], job_id.as_str());
    }

    #[tokio::test]
    async fn test_process_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _router) = test_app(&dir).await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/plan/process",
            Some(json!({"fileId": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        register(&app, "f1", "plan.rvt", "RVT").await;
        let process = Some(json!({"fileId": "f1"}));
        let (status, _) = send(&app, Method::POST, "/plan/process", process.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::POST, "/plan/process", process).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("cannot be routed"));

        let (status, _) = register(&app, "f1", "plan.rvt", "RVT").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_result_states() {
        let dir = tempfile::tempdir().unwrap();
        let (app, router) = test_app(&dir).await;
        register(&app, "f1", "a.dwg", "DWG").await;
        register(&app, "f2", "b.dwg", "DWG").await;

        router
            .ledger()
            .update(&FileId::from("f1"), |f| {
                f.job_id = Some(JobId::from("job_pending"));
                f.status = FileStatus::Processing;
            })
            .await
            .unwrap();
        router
            .ledger()
            .update(&FileId::from("f2"), |f| {
                f.mark_failed(&JobId::from("job_failed"), "work item w9 ended with status failed: x")
            })
            .await
            .unwrap();

        let (status, body) = send(&app, Method::GET, "/plan/result?jobId=job_pending", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");

        let (status, body) = send(&app, Method::GET, "/plan/result?jobId=job_failed", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({"status": "failed", "detail": "work item w9 ended with status failed: x"})
        );

        let (status, _) = send(&app, Method::GET, "/plan/result?jobId=job_nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/plan/result", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_job() {
        let dir = tempfile::tempdir().unwrap();
        let (app, router) = test_app(&dir).await;
        register(&app, "f1", "a.dwg", "DWG").await;
        router
            .ledger()
            .update(&FileId::from("f1"), |f| {
                f.job_id = Some(JobId::from("job_1"));
                f.status = FileStatus::Processing;
            })
            .await
            .unwrap();

        let (status, body) = send(&app, Method::POST, "/plan/jobs/job_1/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"jobId": "job_1", "cancelled": false}));

        let (status, _) = send(&app, Method::POST, "/plan/jobs/job_2/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
