//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request carries no usable acting user.
    MissingUser(String),
    /// Saga execution error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::MissingUser(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::EmptyCart
        | SagaError::ProductNotFound(_)
        | SagaError::InsufficientStock { .. }
        | SagaError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::GatewayDeclined(_) => (StatusCode::PAYMENT_REQUIRED, err.to_string()),
        SagaError::Unauthorized { .. } => (StatusCode::FORBIDDEN, err.to_string()),
        SagaError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::ConcurrencyConflict(_) => {
            tracing::debug!(error = %err, "request lost an optimistic concurrency race");
            (StatusCode::CONFLICT, "please retry".to_string())
        }
        SagaError::OrderClosed { .. } => (StatusCode::CONFLICT, err.to_string()),
        SagaError::GatewayUnavailable(_) => {
            tracing::warn!(error = %err, "payment gateway unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "payment gateway unavailable, please retry".to_string(),
            )
        }
        SagaError::Store(_) | SagaError::Ledger(_) | SagaError::Bus(_) | SagaError::Serialization(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{AggregateId, UserId};
    use domain::OrderStatus;

    use super::*;

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_user_facing_failures() {
        assert_eq!(status_of(SagaError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SagaError::InsufficientStock {
                product_id: AggregateId::new(),
                requested: 3,
                available: 1,
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::GatewayDeclined("card declined".into())),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(SagaError::Unauthorized {
                order_id: AggregateId::new(),
                user_id: UserId::new(),
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(SagaError::NotFound {
                entity: "Order",
                id: AggregateId::new(),
            }),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_conflicts() {
        assert_eq!(
            status_of(SagaError::ConcurrencyConflict("cart".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::OrderClosed {
                status: OrderStatus::Complete,
                action: "cancel",
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_infrastructure_failures_hide_detail() {
        assert_eq!(
            status_of(SagaError::GatewayUnavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(
            status_of(SagaError::Serialization(serde_err)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
