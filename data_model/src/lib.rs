pub mod test_objects;

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumIter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Pipeline job identifier allocated by the router, distinct from the remote
/// work item id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(format!("job_{}", uuid::Uuid::new_v4()))
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, StrumDisplay, AsRefStr, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    Rvt,
    Dwg,
    Ifc,
    PdfVector,
    PdfImage,
    Image,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, StrumDisplay, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Processed | FileStatus::Failed)
    }

    /// Statuses only move forward. Terminal statuses never change.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        use FileStatus::*;
        match (self, next) {
            (Uploaded, _) => true,
            (Processing, Processing | Processed | Failed) => true,
            (Processing, Uploaded) => false,
            (Processed, _) | (Failed, _) => false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("file id cannot change from {from} to {to}")]
    IdChanged { from: FileId, to: FileId },

    #[error("status cannot move from {from} to {to}")]
    IllegalTransition { from: FileStatus, to: FileStatus },

    #[error("file {0} is in a terminal state and cannot be modified")]
    TerminalRecord(FileId),

    #[error("file {id} has status {status} but result_path presence is {has_result}")]
    ResultPathMismatch {
        id: FileId,
        status: FileStatus,
        has_result: bool,
    },

    #[error("file {id} has status {status} but failure_detail presence is {has_detail}")]
    FailureDetailMismatch {
        id: FileId,
        status: FileStatus,
        has_detail: bool,
    },

    #[error("file {id} has status {status} but no job id")]
    MissingJobId { id: FileId, status: FileStatus },
}

/// One uploaded plan artifact and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[builder(default = "FileId::generate()")]
    pub id: FileId,
    #[builder(setter(into))]
    pub original_name: String,
    #[builder(setter(into), default = "\"application/octet-stream\".to_string()")]
    pub mime_type: String,
    #[builder(setter(into), default)]
    pub ext: String,
    #[builder(default)]
    pub size_bytes: u64,
    #[builder(setter(into))]
    pub local_path: PathBuf,
    #[builder(default = "Utc::now()")]
    pub created_at: DateTime<Utc>,
    pub kind: FileKind,
    #[builder(default)]
    pub status: FileStatus,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<WorkItemId>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<PathBuf>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

impl StoredFile {
    /// Checks the invariants that hold for a record on its own.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let processed = self.status == FileStatus::Processed;
        if processed != self.result_path.is_some() {
            return Err(InvariantViolation::ResultPathMismatch {
                id: self.id.clone(),
                status: self.status,
                has_result: self.result_path.is_some(),
            });
        }
        let failed = self.status == FileStatus::Failed;
        if failed != self.failure_detail.is_some() {
            return Err(InvariantViolation::FailureDetailMismatch {
                id: self.id.clone(),
                status: self.status,
                has_detail: self.failure_detail.is_some(),
            });
        }
        if self.status != FileStatus::Uploaded && self.job_id.is_none() {
            return Err(InvariantViolation::MissingJobId {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Checks that `next` is a legal successor of this record.
    pub fn check_transition(&self, next: &StoredFile) -> Result<(), InvariantViolation> {
        if self.id != next.id {
            return Err(InvariantViolation::IdChanged {
                from: self.id.clone(),
                to: next.id.clone(),
            });
        }
        if self.status.is_terminal() {
            if self == next {
                return Ok(());
            }
            return Err(InvariantViolation::TerminalRecord(self.id.clone()));
        }
        if !self.status.can_transition_to(next.status) {
            return Err(InvariantViolation::IllegalTransition {
                from: self.status,
                to: next.status,
            });
        }
        next.check_invariants()
    }

    pub fn mark_failed(&mut self, job_id: &JobId, detail: impl Into<String>) {
        self.status = FileStatus::Failed;
        self.job_id.get_or_insert_with(|| job_id.clone());
        self.result_path = None;
        self.failure_detail = Some(detail.into());
    }
}

/// Activity routing entry for one file kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityBinding {
    pub activity_id: String,
    pub input_argument: String,
    pub output_argument: String,
}

impl ActivityBinding {
    pub fn new(activity_id: &str, input_argument: &str, output_argument: &str) -> Self {
        Self {
            activity_id: activity_id.to_string(),
            input_argument: input_argument.to_string(),
            output_argument: output_argument.to_string(),
        }
    }
}

const REVIT_ROOMS_ACTIVITY: &str = "LBF-Revit-Rooms-v1";
const ACAD_ROOMS_ACTIVITY: &str = "LBF-Acad-Rooms-v1";

/// Static routing table from file kind to the remote activity that handles
/// it. One slot per kind; `None` means the kind is not routed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityTable {
    #[serde(default)]
    pub rvt: Option<ActivityBinding>,
    #[serde(default)]
    pub dwg: Option<ActivityBinding>,
    #[serde(default)]
    pub ifc: Option<ActivityBinding>,
    #[serde(default)]
    pub pdf_vector: Option<ActivityBinding>,
    #[serde(default)]
    pub pdf_image: Option<ActivityBinding>,
    #[serde(default)]
    pub image: Option<ActivityBinding>,
}

impl ActivityTable {
    pub fn empty() -> Self {
        Self {
            rvt: None,
            dwg: None,
            ifc: None,
            pdf_vector: None,
            pdf_image: None,
            image: None,
        }
    }

    pub fn lookup(&self, kind: FileKind) -> Option<&ActivityBinding> {
        match kind {
            FileKind::Rvt => self.rvt.as_ref(),
            FileKind::Dwg => self.dwg.as_ref(),
            FileKind::Ifc => self.ifc.as_ref(),
            FileKind::PdfVector => self.pdf_vector.as_ref(),
            FileKind::PdfImage => self.pdf_image.as_ref(),
            FileKind::Image => self.image.as_ref(),
        }
    }
}

impl Default for ActivityTable {
    fn default() -> Self {
        Self {
            rvt: Some(ActivityBinding::new(
                REVIT_ROOMS_ACTIVITY,
                "inputRvt",
                "outputJson",
            )),
            dwg: Some(ActivityBinding::new(
                ACAD_ROOMS_ACTIVITY,
                "inputDwg",
                "outputJson",
            )),
            ifc: None,
            pdf_vector: Some(ActivityBinding::new(
                ACAD_ROOMS_ACTIVITY,
                "inputDwg",
                "outputJson",
            )),
            pdf_image: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Get,
    Put,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArgumentBinding {
    pub verb: Verb,
    pub url: String,
}

/// A single work item submission: which activity to run and where its
/// arguments live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemLaunch {
    pub activity_id: String,
    pub argument_bindings: BTreeMap<String, ArgumentBinding>,
    pub output_object_key: String,
    pub result_path: PathBuf,
}

impl WorkItemLaunch {
    pub fn new(
        activity: &ActivityBinding,
        input_url: String,
        output_url: String,
        output_object_key: String,
        result_path: PathBuf,
    ) -> Self {
        let mut argument_bindings = BTreeMap::new();
        argument_bindings.insert(
            activity.input_argument.clone(),
            ArgumentBinding {
                verb: Verb::Get,
                url: input_url,
            },
        );
        argument_bindings.insert(
            activity.output_argument.clone(),
            ArgumentBinding {
                verb: Verb::Put,
                url: output_url,
            },
        );
        Self {
            activity_id: activity.activity_id.clone(),
            argument_bindings,
            output_object_key,
            result_path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSummary {
    pub name: String,
    pub area_m2: Option<f64>,
    pub perimeter_m: Option<f64>,
    pub bbox: BoundingBox,
    pub source: String,
}

/// Rooms document produced by an extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomsPayload {
    #[serde(rename = "fileId")]
    pub file_id: String,
    pub rooms: Vec<RoomSummary>,
}
