use axum::Json;
use axum::extract::{Path, State};
use hw_db::Transition;

use crate::dto::MessageResponse;
use crate::error::ApiError;
use crate::lifecycle::{completion_message, confirm_transition};
use crate::state::AppState;

pub async fn confirm_launch(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    confirm(&state, Transition::Launching, &instance_id).await
}

pub async fn confirm_termination(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    confirm(&state, Transition::Terminating, &instance_id).await
}

async fn confirm(
    state: &AppState,
    transition: Transition,
    instance_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    confirm_transition(state, transition, instance_id).await?;
    Ok(Json(MessageResponse::new(completion_message(transition))))
}
