use axum::Json;
use axum::extract::{Path, State};

use crate::dto::StateResponse;
use crate::error::ApiError;
use crate::state::AppState;

/// Report the instance's expected state and note that it checked in.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    let instance_state = state.repo.fetch_instance_state(&instance_id).await?;

    if let Err(e) = state.repo.store_instance_event(&instance_id, "heartbeat").await {
        tracing::warn!(instance_id, error = %e, "failed to record heartbeat");
    }

    Ok(Json(StateResponse {
        state: instance_state,
    }))
}
