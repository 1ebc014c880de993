use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use data_model::{FileId, FileKind, FileStatus, JobId};
use ledger::LedgerError;
use processor::RouterError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal_error_str(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.message);
        }
        (self.status_code, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        let message = err.to_string();
        match err {
            RouterError::FileNotFound(_) | RouterError::JobNotFound(_) => {
                Self::not_found(&message)
            }
            RouterError::NotRoutable { .. } => Self::conflict(&message),
            RouterError::Ledger(err) => err.into(),
            _ => Self::internal_error_str(&message),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::NotFound(_) => Self::not_found(&message),
            LedgerError::Duplicate(_) | LedgerError::JobIdInUse { .. } => Self::conflict(&message),
            LedgerError::Invariant(_) => Self::bad_request(&message),
            _ => Self::internal_error_str(&message),
        }
    }
}

/// A file the upload store has already written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFile {
    pub id: Option<String>,
    pub original_name: String,
    pub local_path: PathBuf,
    pub kind: FileKind,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredFile {
    pub file_id: FileId,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFile {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResult {
    pub status: FileStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedResult {
    pub status: FileStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledJob {
    pub job_id: JobId,
    pub cancelled: bool,
}
