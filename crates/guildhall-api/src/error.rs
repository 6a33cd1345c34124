use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use guildhall_db::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Conflict(_)) | Self::Store(StoreError::InvalidState(_)) => {
                StatusCode::CONFLICT
            }
            Self::Store(StoreError::BadRequest(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Busy(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }
        // Driver details stay in the log
        let message = match &self {
            Self::Store(StoreError::Sqlite(_)) | Self::Store(StoreError::Internal(_)) | Self::Internal(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(StoreError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (ApiError::from(StoreError::Conflict("x".into())), StatusCode::CONFLICT),
            (ApiError::from(StoreError::InvalidState("x".into())), StatusCode::CONFLICT),
            (ApiError::from(StoreError::Busy("x".into())), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status);
        }
        assert!(ApiError::from(StoreError::Busy("x".into())).is_transient());
        assert!(!ApiError::from(StoreError::Conflict("x".into())).is_transient());
    }
}
