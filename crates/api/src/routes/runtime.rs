use axum::extract::{Path, State};
use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use journey_domain::runtime::model::{JourneyView, SubmitOutcome};
use journey_domain::util::format_ms_rfc3339;
use journey_domain::validation::{
    GroupSubmission, ValidationCode, ValidationError, ValidationReport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::map_domain_error;
use crate::{error::ApiError, observability, state::AppState, validation};

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SESSION_EXPIRES_AT_HEADER: &str = "x-session-expires-at";
pub const SESSION_RENEWED_HEADER: &str = "x-session-renewed";

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StartSessionRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validation::not_blank"))]
    journey_code: String,
    #[validate(length(min = 1, max = 128), custom(function = "validation::not_blank"))]
    customer_ref: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitGroupRequest {
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    force_invalid: bool,
}

#[derive(Serialize)]
pub(crate) struct SessionResponse {
    #[serde(flatten)]
    view: JourneyView,
    session_expires_at: String,
}

impl From<JourneyView> for SessionResponse {
    fn from(view: JourneyView) -> Self {
        Self {
            session_expires_at: format_ms_rfc3339(view.session_expires_at_ms),
            view,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct SubmitGroupResponse {
    validate_result: bool,
    errors: Vec<ValidationError>,
}

pub(crate) async fn start_session(
    State(state): State<AppState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    let payload = validation::validated(payload)?;
    let view = state
        .runtime
        .start(&payload.journey_code, &payload.customer_ref)
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(view))).into_response())
}

pub(crate) async fn restart_session(
    State(state): State<AppState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    let payload = validation::validated(payload)?;
    let view = state
        .runtime
        .restart(&payload.journey_code, &payload.customer_ref)
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(view))).into_response())
}

pub(crate) async fn get_current(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let view = state
        .runtime
        .get_current(&session_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(SessionResponse::from(view)))
}

pub(crate) async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .runtime
        .close_session(&session_id)
        .await
        .map_err(map_domain_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn submit_group(
    State(state): State<AppState>,
    Path((session_id, group_code)): Path<(String, String)>,
    Json(payload): Json<SubmitGroupRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .runtime
        .submit(
            &session_id,
            &group_code,
            payload.payload,
            payload.force_invalid,
        )
        .await
        .map_err(map_domain_error)?;

    observability::register_submit_outcome(
        group_code.trim(),
        outcome.validate_result,
        outcome.session_renewed,
    );
    let headers = session_headers(&outcome);
    let body = SubmitGroupResponse {
        validate_result: outcome.validate_result,
        errors: outcome.errors,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

fn session_headers(outcome: &SubmitOutcome) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let values = [
        (SESSION_ID_HEADER, outcome.session_id.clone()),
        (
            SESSION_EXPIRES_AT_HEADER,
            format_ms_rfc3339(outcome.session_expires_at_ms),
        ),
        (SESSION_RENEWED_HEADER, outcome.session_renewed.to_string()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

/// Dry-run validation of a group payload against the current snapshot.
pub(crate) async fn validate_payload(
    State(state): State<AppState>,
    Path((journey_code, group_no)): Path<(String, u32)>,
    Json(payload): Json<Value>,
) -> Json<ValidationReport> {
    let report = match GroupSubmission::from_value(&payload) {
        Ok(submission) => state
            .runtime
            .validate_payload(&journey_code, group_no, &submission),
        Err(err) => ValidationReport::fail(ValidationError::new(
            ValidationCode::Payload,
            format!("payload could not be decoded: {err}"),
        )),
    };
    Json(report)
}
