use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use techfix_core::{CourierError, ErrorCategory, RowStoreError};
use thiserror::Error;

/// Start-up failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("courier core error: {0}")]
    Courier(#[from] CourierError),

    #[error("row-store setup failed: {0}")]
    RowStore(#[from] RowStoreError),
}

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error(transparent)]
    Courier(#[from] CourierError),
}

impl ApiError {
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Http { status, .. } => *status,
            ApiError::Courier(err) => status_for(err.category()),
        }
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation | ErrorCategory::InsufficientStock => StatusCode::BAD_REQUEST,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::StateConflict => StatusCode::CONFLICT,
        ErrorCategory::ExternalStore | ErrorCategory::Storage => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = match &self {
            ApiError::Unauthenticated(message) => serde_json::json!({
                "success": false,
                "error": "Unauthenticated",
                "message": message,
            }),
            ApiError::Http { status, message } => serde_json::json!({
                "success": false,
                "error": status.canonical_reason().unwrap_or("RequestError"),
                "message": message,
            }),
            ApiError::Courier(err) => serde_json::json!({
                "success": false,
                "error": err.kind(),
                "message": err.to_string(),
            }),
        };

        if let ApiError::Courier(err) = &self {
            if let Some(details) = err.details() {
                body["details"] = details;
            }
        }

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_status_codes() {
        let cases = [
            (CourierError::EmptyItems, StatusCode::BAD_REQUEST),
            (
                CourierError::InsufficientStock {
                    spare_id: "A1".to_string(),
                    available: 3,
                    requested: 4,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                CourierError::Forbidden("not a recipient".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (CourierError::MissingBinding(7), StatusCode::NOT_FOUND),
            (
                CourierError::AlreadyReceived("COURIER-1".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                CourierError::ExternalStore(RowStoreError::Transport("reset".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
        assert_eq!(
            ApiError::unauthenticated("missing").status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
