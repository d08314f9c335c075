use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "journey_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "journey_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "journey_api_http_errors_total";
const GROUP_SUBMISSIONS_TOTAL: &str = "journey_api_group_submissions_total";
const SESSION_RENEWALS_TOTAL: &str = "journey_api_session_renewals_total";
const CONFIG_REFRESHES_TOTAL: &str = "journey_api_config_refreshes_total";
const CONFIG_SNAPSHOT_GROUPS: &str = "journey_api_config_snapshot_groups";
const SESSIONS_SWEPT_TOTAL: &str = "journey_api_sessions_swept_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone()
    )
    .record(elapsed.as_secs_f64());

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status_code
        )
        .increment(1);
    }
}

pub fn register_submit_outcome(group_code: &str, validated: bool, renewed: bool) {
    let outcome = if validated { "validated" } else { "invalidated" };
    counter!(
        GROUP_SUBMISSIONS_TOTAL,
        "group" => group_code.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    if renewed {
        counter!(SESSION_RENEWALS_TOTAL).increment(1);
    }
}

pub fn register_config_refresh(succeeded: bool, group_count: Option<usize>) {
    let result = if succeeded { "success" } else { "error" };
    counter!(CONFIG_REFRESHES_TOTAL, "result" => result).increment(1);
    if let Some(group_count) = group_count {
        gauge!(CONFIG_SNAPSHOT_GROUPS).set(group_count as f64);
    }
}

pub fn register_sessions_swept(expired: u64) {
    counter!(SESSIONS_SWEPT_TOTAL).increment(expired);
}
