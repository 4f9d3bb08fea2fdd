use axum::Json;
use axum::extract::{Path, State};

use crate::dto::{AllEventsResponse, InstanceEventsResponse};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn instance_events(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<InstanceEventsResponse>, ApiError> {
    let events = state.repo.fetch_instance_events(&instance_id).await?;
    Ok(Json(InstanceEventsResponse {
        events,
        instance_id,
    }))
}

/// Events for every tracked instance; `@total` counts instances.
pub async fn all_events(State(state): State<AppState>) -> Result<Json<AllEventsResponse>, ApiError> {
    let events = state.repo.fetch_all_instance_events().await?;
    Ok(Json(AllEventsResponse {
        total: events.len(),
        events,
    }))
}
