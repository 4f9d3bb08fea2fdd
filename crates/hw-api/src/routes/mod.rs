pub mod events;
pub mod heartbeats;
pub mod lifecycle;
pub mod sns;
pub mod tokens;

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use tower_http::catch_panic::CatchPanicLayer;

use crate::auth::{require_instance, require_operator};
use crate::dto::MessageResponse;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let operator = Router::new()
        .route("/tokens/{instance_id}", get(tokens::exchange_token))
        .route("/events", get(events::all_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_operator,
        ));

    let instance = Router::new()
        .route("/heartbeats/{instance_id}", get(heartbeats::heartbeat))
        .route("/launches/{instance_id}", post(lifecycle::confirm_launch))
        .route(
            "/terminations/{instance_id}",
            post(lifecycle::confirm_termination),
        )
        .route("/events/{instance_id}", get(events::instance_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_instance,
        ));

    Router::new()
        // GET also answers HEAD
        .route("/", get(ohai))
        .route("/sns", post(sns::receive))
        .merge(operator)
        .merge(instance)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

async fn ohai() -> Json<MessageResponse> {
    Json(MessageResponse::new("ohai™"))
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}
