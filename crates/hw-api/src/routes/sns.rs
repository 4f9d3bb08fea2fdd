use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::info;

use crate::dto::MessageResponse;
use crate::error::ApiError;
use crate::lifecycle::{NotificationOutcome, handle_notification};
use crate::sns::{Envelope, MessageType};
use crate::state::AppState;

/// SNS posts with `Content-Type: text/plain`, so the body is taken raw.
pub async fn receive(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let envelope: Envelope = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid notification: {e}")))?;

    state.verifier.verify(&envelope).await?;

    match envelope.message_type() {
        MessageType::SubscriptionConfirmation => {
            state
                .providers
                .notifications
                .confirm_subscription(&envelope.topic_arn, &envelope.token)
                .await?;
            info!(topic_arn = %envelope.topic_arn, "subscription confirmed");
            Ok((StatusCode::OK, Json(MessageResponse::new("subscription confirmed"))))
        }
        MessageType::Notification => match handle_notification(&state, &envelope.message).await? {
            NotificationOutcome::TestAccepted => Ok((
                StatusCode::ACCEPTED,
                Json(MessageResponse::new("test notification accepted")),
            )),
            NotificationOutcome::Recorded(transition) => Ok((
                StatusCode::OK,
                Json(MessageResponse::new(format!("{transition} lifecycle action recorded"))),
            )),
        },
        MessageType::UnsubscribeConfirmation => {
            info!(topic_arn = %envelope.topic_arn, "unsubscribe confirmation received");
            Ok((StatusCode::OK, Json(MessageResponse::new("unsubscribe acknowledged"))))
        }
        MessageType::Unknown => Err(ApiError::BadRequest(format!(
            "unknown message type '{}'",
            envelope.kind
        ))),
    }
}
