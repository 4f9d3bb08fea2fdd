use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};

use crate::dto::TokenResponse;
use crate::state::AppState;

/// Trade the instance's one-time launch token for its persistent
/// credential. The temp token is consumed, so a second call is a 404.
pub async fn exchange_token(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let plain = prefers_plain_text(&headers);

    match state.repo.exchange_temp_instance_token(&instance_id).await {
        Ok(token) => {
            tracing::info!(instance_id, "instance token issued");
            if plain {
                ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], token).into_response()
            } else {
                Json(TokenResponse { token }).into_response()
            }
        }
        Err(e) => {
            let err = crate::error::ApiError::from(e);
            if plain {
                (
                    err.status(),
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    err.to_string(),
                )
                    .into_response()
            } else {
                err.into_response()
            }
        }
    }
}

/// The first of `text/plain` or `application/json` listed in `Accept`
/// decides; anything else falls back to JSON.
fn prefers_plain_text(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    for range in accept.split(',') {
        let media = range.split(';').next().unwrap_or_default().trim();
        if media.eq_ignore_ascii_case("text/plain") {
            return true;
        }
        if media.eq_ignore_ascii_case("application/json") {
            return false;
        }
    }
    false
}
