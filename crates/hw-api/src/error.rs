use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::sns::VerificationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Repository(#[from] hw_db::Error),

    #[error("upstream error: {0}")]
    Upstream(#[from] hw_infra::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Verification(_) => StatusCode::BAD_REQUEST,
            ApiError::Repository(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Repository(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        let mut response = (status, axum::Json(body)).into_response();
        if matches!(self, ApiError::Unauthorized) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("token"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_by_class() {
        assert_eq!(
            ApiError::from(hw_db::Error::EmptyInstanceId).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(hw_db::Error::NotFound {
                what: "state",
                instance_id: "i-1".into(),
            })
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unauthorized_challenges_for_a_token() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "token");
    }
}
