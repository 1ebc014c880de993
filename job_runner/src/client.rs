use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use credentials::TokenProvider;
use data_model::{ArgumentBinding, WorkItemId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{JobError, JobResult, StatusReport, WorkItemStatus};

pub const DEFAULT_DA_SCOPE: &str = "code:all data:read data:write bucket:read bucket:create";

/// Remote job-execution service: submit a work item, query its status.
#[async_trait]
pub trait WorkItemService: Send + Sync {
    async fn submit(
        &self,
        activity_id: &str,
        arguments: &BTreeMap<String, ArgumentBinding>,
    ) -> JobResult<WorkItemId>;

    async fn status(&self, work_item_id: &WorkItemId) -> JobResult<StatusReport>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesignAutomationConfig {
    /// Base URL including the region and API version, e.g.
    /// `https://host/da/us-east/v3`.
    pub base_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    DEFAULT_DA_SCOPE.to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    activity_id: &'a str,
    arguments: &'a BTreeMap<String, ArgumentBinding>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    #[serde(default)]
    status_details: Option<Value>,
}

/// HTTP client for the Design Automation work item API.
pub struct DesignAutomationClient {
    http: reqwest::Client,
    config: DesignAutomationConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl DesignAutomationClient {
    pub fn new(
        http: reqwest::Client,
        config: DesignAutomationConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            config,
            tokens,
        }
    }

    fn url(&self, segments: &[&str]) -> JobResult<Url> {
        let invalid = |reason: String| JobError::InvalidUrl {
            url: self.config.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.config.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn render_detail(detail: Option<Value>) -> String {
    match detail {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl WorkItemService for DesignAutomationClient {
    async fn submit(
        &self,
        activity_id: &str,
        arguments: &BTreeMap<String, ArgumentBinding>,
    ) -> JobResult<WorkItemId> {
        let url = self.url(&["workitems"])?;
        let token = self.tokens.get_token(&self.config.scope).await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&SubmitRequest {
                activity_id,
                arguments,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(activity_id, status = status.as_u16(), "work item launch rejected");
            return Err(JobError::Launch {
                status: status.as_u16(),
                body,
            });
        }
        let payload: SubmitResponse = response.json().await?;
        Ok(WorkItemId::new(payload.id))
    }

    async fn status(&self, work_item_id: &WorkItemId) -> JobResult<StatusReport> {
        let url = self.url(&["workitems", work_item_id.get()])?;
        let token = self.tokens.get_token(&self.config.scope).await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Poll {
                work_item_id: work_item_id.clone(),
                reason: format!("status query returned {}: {}", status.as_u16(), body),
            });
        }
        let payload: StatusResponse = response.json().await?;
        debug!(work_item_id = work_item_id.get(), status = payload.status.as_str(), "work item status");
        Ok(StatusReport::new(
            WorkItemStatus::parse(&payload.status),
            render_detail(payload.status_details),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Json,
        Router,
    };
    use credentials::AuthResult;
    use data_model::Verb;
    use serde_json::json;

    use super::*;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn get_token(&self, scope: &str) -> AuthResult<String> {
            assert_eq!(scope, DEFAULT_DA_SCOPE);
            Ok("da-token".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct Captured {
        submissions: Arc<Mutex<Vec<Value>>>,
    }

    async fn submit(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        assert_eq!(headers["authorization"], "Bearer da-token");
        if body["activityId"] == "Missing-Activity" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"diagnostic": "activity not found"})),
            );
        }
        captured.submissions.lock().unwrap().push(body);
        (StatusCode::OK, Json(json!({"id": "w1", "status": "pending"})))
    }

    async fn status(Path(id): Path<String>) -> impl IntoResponse {
        match id.as_str() {
            "w1" => (StatusCode::OK, Json(json!({"status": "inprogress"}))),
            "w2" => (
                StatusCode::OK,
                Json(json!({"status": "failedInstructions", "statusDetails": "bad input"})),
            ),
            _ => (StatusCode::NOT_FOUND, Json(json!({"diagnostic": "gone"}))),
        }
    }

    async fn serve(captured: Captured) -> String {
        let router = Router::new()
            .route("/da/us-east/v3/workitems", post(submit))
            .route("/da/us-east/v3/workitems/{id}", get(status))
            .with_state(captured);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/da/us-east/v3", addr)
    }

    fn client(base_url: String) -> DesignAutomationClient {
        DesignAutomationClient::new(
            reqwest::Client::new(),
            DesignAutomationConfig {
                base_url,
                scope: DEFAULT_DA_SCOPE.to_string(),
            },
            Arc::new(StaticToken),
        )
    }

    fn arguments() -> BTreeMap<String, ArgumentBinding> {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "inputDwg".to_string(),
            ArgumentBinding {
                verb: Verb::Get,
                url: "https://signed/in".to_string(),
            },
        );
        arguments.insert(
            "outputJson".to_string(),
            ArgumentBinding {
                verb: Verb::Put,
                url: "https://signed/out".to_string(),
            },
        );
        arguments
    }

    #[tokio::test]
    async fn test_submit_sends_activity_and_arguments() {
        let captured = Captured::default();
        let client = client(serve(captured.clone()).await);

        let id = client
            .submit("LBF-Acad-Rooms-v1", &arguments())
            .await
            .unwrap();
        assert_eq!(id, WorkItemId::from("w1"));

        let submissions = captured.submissions.lock().unwrap().clone();
        assert_eq!(
            submissions,
            vec![json!({
                "activityId": "LBF-Acad-Rooms-v1",
                "arguments": {
                    "inputDwg": {"verb": "get", "url": "https://signed/in"},
                    "outputJson": {"verb": "put", "url": "https://signed/out"},
                }
            })]
        );
    }

    #[tokio::test]
    async fn test_rejected_submit_carries_body() {
        let client = client(serve(Captured::default()).await);
        let err = client
            .submit("Missing-Activity", &arguments())
            .await
            .unwrap_err();
        match err {
            JobError::Launch { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("activity not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_status_reports() {
        let client = client(serve(Captured::default()).await);

        let report = client.status(&WorkItemId::from("w1")).await.unwrap();
        assert_eq!(report, StatusReport::new(WorkItemStatus::InProgress, ""));

        let report = client.status(&WorkItemId::from("w2")).await.unwrap();
        assert_eq!(
            report,
            StatusReport::new(
                WorkItemStatus::Failed("failedInstructions".to_string()),
                "bad input"
            )
        );

        let err = client.status(&WorkItemId::from("w3")).await.unwrap_err();
        assert!(matches!(err, JobError::Poll { .. }));
    }
}
