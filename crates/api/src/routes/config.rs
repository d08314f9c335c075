use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use journey_domain::snapshot::ConfigSnapshot;
use journey_domain::util::format_ms_rfc3339;
use serde::Serialize;

use super::map_domain_error;
use crate::{error::ApiError, observability, state::AppState};

#[derive(Debug, Serialize)]
pub(crate) struct RefreshResponse {
    loaded_at: String,
    journeys: Vec<String>,
    group_count: usize,
    form_count: usize,
}

impl RefreshResponse {
    fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            loaded_at: format_ms_rfc3339(snapshot.loaded_at_ms),
            journeys: snapshot.journeys.clone(),
            group_count: snapshot.group_count(),
            form_count: snapshot.form_fields.len(),
        }
    }
}

/// Re-reads the catalog file when there is one, then rebuilds the snapshot.
pub(crate) async fn refresh(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    if state.catalog_from_file {
        if let Err(err) = state
            .catalog
            .reload_from_path(&state.config.catalog_path)
            .await
        {
            observability::register_config_refresh(false, None);
            return Err(map_domain_error(err.into()));
        }
    }

    match state.runtime.refresh_configuration().await {
        Ok(snapshot) => {
            observability::register_config_refresh(true, Some(snapshot.group_count()));
            Ok(Json(RefreshResponse::from_snapshot(&snapshot)))
        }
        Err(err) => {
            observability::register_config_refresh(false, None);
            Err(map_domain_error(err))
        }
    }
}

pub(crate) async fn preloaded(State(state): State<AppState>) -> Response {
    let snapshot = state.runtime.snapshots().current();
    Json(snapshot.as_ref()).into_response()
}
