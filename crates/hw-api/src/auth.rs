use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Middleware for operator routes: `Authorization: token <value>` must
/// match one of the configured `AUTH_TOKENS`.
pub async fn require_operator(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let presented = match presented_credential(req.headers()) {
        Ok(presented) => presented,
        Err(e) => return e.into_response(),
    };

    let mut matched = subtle::Choice::from(0);
    for token in &state.config.auth_tokens {
        matched |= credential_matches(presented, token);
    }
    if !bool::from(matched) {
        tracing::warn!(path = %req.uri().path(), "operator credential rejected");
        return ApiError::Forbidden.into_response();
    }

    next.run(req).await
}

/// Middleware for per-instance routes: the credential must match the
/// instance's current persistent token. Reading the token extends its
/// lifetime.
pub async fn require_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    req: Request,
    next: Next,
) -> Response {
    match check_instance(&state, &instance_id, req.headers()).await {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

async fn check_instance(state: &AppState, instance_id: &str, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = presented_credential(headers)?;

    let token = match state.repo.fetch_instance_token(instance_id).await {
        Ok(Some(token)) => token,
        Ok(None) => return Err(ApiError::Forbidden),
        Err(e) if e.is_validation() => return Err(ApiError::Forbidden),
        Err(e) => return Err(e.into()),
    };

    if !bool::from(credential_matches(presented, &token)) {
        tracing::warn!(instance_id, "instance credential rejected");
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

fn presented_credential(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)
}

fn credential_matches(presented: &str, token: &str) -> subtle::Choice {
    let expected = format!("token {token}");
    presented.as_bytes().ct_eq(expected.as_bytes())
}
