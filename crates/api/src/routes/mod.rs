use axum::extract::State;
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use journey_domain::error::DomainError;
use journey_domain::util::format_ms_rfc3339;
use serde::Serialize;

use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

mod config;
mod runtime;

pub fn router(state: AppState) -> Router {
    let runtime_routes = Router::new()
        .route("/runtime/sessions", post(runtime::start_session))
        .route("/runtime/sessions/restart", post(runtime::restart_session))
        .route(
            "/runtime/sessions/:session_id",
            get(runtime::get_current).delete(runtime::close_session),
        )
        .route(
            "/runtime/sessions/:session_id/groups/:group_code",
            post(runtime::submit_group),
        )
        .route(
            "/runtime/journeys/:journey_code/groups/:group_no/payload/validate",
            post(runtime::validate_payload),
        );

    let config_routes = Router::new()
        .route("/config/refresh", post(config::refresh))
        .route("/config/preloaded", get(config::preloaded));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(runtime_routes)
        .merge(config_routes)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer(state.config.request_timeout()))
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    config_loaded_at: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.runtime.snapshots().current();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        config_loaded_at: snapshot
            .is_loaded()
            .then(|| format_ms_rfc3339(snapshot.loaded_at_ms)),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

pub(crate) fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::UnknownJourney(code) => ApiError::UnknownJourney(code),
        DomainError::Config(message) => ApiError::Config(message),
        err @ DomainError::OrderingConflict { .. } => ApiError::OrderingConflict(err.to_string()),
        err @ DomainError::ApplicationClosed { .. } => {
            ApiError::ApplicationClosed(err.to_string())
        }
        DomainError::SessionExpired => ApiError::SessionExpired,
        DomainError::NotFound(what) => ApiError::NotFound(what),
        DomainError::Conflict => ApiError::Conflict,
        DomainError::Storage(message) => {
            tracing::error!(error = %message, "storage failure");
            ApiError::Internal
        }
    }
}
