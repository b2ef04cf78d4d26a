use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("ride {0} is already assigned")]
    AlreadyAssigned(String),

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: String, requested: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable tag, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::AlreadyAssigned(_) => "already_assigned",
            AppError::DriverUnavailable(_) => "driver_unavailable",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Timeout(_) => "timeout",
            AppError::Conflict(_) => "conflict",
            AppError::PaymentFailed(_) => "payment_failed",
            AppError::Cancelled(_) => "cancelled",
            AppError::Internal(_) => "internal",
        }
    }

    /// Outcomes that are part of normal operation under contention.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            AppError::AlreadyAssigned(_) | AppError::DriverUnavailable(_)
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_)
            | AppError::AlreadyAssigned(_)
            | AppError::DriverUnavailable(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientFunds { .. } | AppError::PaymentFailed(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn race_losses_map_to_conflict() {
        let response = AppError::AlreadyAssigned("r1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn insufficient_funds_maps_to_payment_required() {
        let err = AppError::InsufficientFunds {
            balance: "10.00".to_string(),
            requested: "25.00".to_string(),
        };
        assert_eq!(err.kind(), "insufficient_funds");
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn only_race_outcomes_are_routine() {
        assert!(AppError::AlreadyAssigned("r".into()).is_routine());
        assert!(AppError::DriverUnavailable("d".into()).is_routine());
        assert!(!AppError::Conflict("c".into()).is_routine());
    }
}
