use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::ValidationError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    InProgress,
    ReadyForFinalisation,
    Completed,
    Cancelled,
    Superseded,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::ReadyForFinalisation => "READY_FOR_FINALISATION",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    /// Open applications still accept submissions.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::InProgress | Self::ReadyForFinalisation)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Expired,
    Closed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Validated,
    Invalidated,
}

/// Group status as presented to callers; a group never submitted is missing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupProgress {
    Validated,
    Invalidated,
    Missing,
}

impl GroupProgress {
    pub fn validate_result(&self) -> Option<bool> {
        match self {
            Self::Validated => Some(true),
            Self::Invalidated => Some(false),
            Self::Missing => None,
        }
    }
}

impl From<GroupStatus> for GroupProgress {
    fn from(status: GroupStatus) -> Self {
        match status {
            GroupStatus::Validated => Self::Validated,
            GroupStatus::Invalidated => Self::Invalidated,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    pub application_id: String,
    pub journey_id: String,
    pub journey_code: String,
    pub customer_ref: String,
    pub status: ApplicationStatus,
    pub current_group_no: u32,
    pub furthest_group_no: u32,
    pub version: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub application_id: String,
    pub status: SessionStatus,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Session {
    pub fn is_usable(&self, now_ms: i64) -> bool {
        self.status == SessionStatus::Active && self.expires_at_ms > now_ms
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupState {
    pub application_id: String,
    pub group_no: u32,
    pub status: GroupStatus,
    pub payload: Value,
    pub submission_version: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Versioned progress write; applied only while the row is still at
/// `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub application_id: String,
    pub expected_version: u64,
    pub status: ApplicationStatus,
    pub current_group_no: u32,
    pub furthest_group_no: u32,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GroupView {
    pub group_no: u32,
    pub status: GroupProgress,
    pub validate_result: Option<bool>,
    pub payload: Option<Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct JourneyView {
    pub session_id: String,
    pub application_id: String,
    pub journey_code: String,
    pub current_group_no: u32,
    pub application_status: ApplicationStatus,
    pub session_expires_at_ms: i64,
    pub next_group_no: Option<u32>,
    pub groups: Vec<GroupView>,
}

impl JourneyView {
    pub fn group(&self, group_no: u32) -> Option<&GroupView> {
        self.groups.iter().find(|group| group.group_no == group_no)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SubmitOutcome {
    pub validate_result: bool,
    pub session_id: String,
    pub session_expires_at_ms: i64,
    pub session_renewed: bool,
    pub errors: Vec<ValidationError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub session_ttl: Duration,
    pub validate_payload_on_submit: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            validate_payload_on_submit: false,
        }
    }
}
