use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("booking was modified concurrently, please retry")]
    Conflict,

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Payment(e) => e.status_code(),
        };

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal server error".to_string()
            }
            AppError::Payment(e) => e.user_message(),
            other => other.to_string(),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Failures while collecting a payment. The `Display` text is the admin-facing detail;
/// `user_message` is what a customer may see.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment validation failed: {0}")]
    Validation(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("payment processing error: {0}")]
    Processing(String),

    #[error("unexpected payment error: {0}")]
    Unexpected(String),
}

impl PaymentError {
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation(message) => message.clone(),
            PaymentError::Gateway(_) => {
                "Payment service temporarily unavailable. Please try again in a few minutes."
                    .to_string()
            }
            PaymentError::Processing(_) => {
                "Payment processing failed. Please try again or contact support.".to_string()
            }
            PaymentError::Unexpected(_) => {
                "Payment processing failed. Please check your payment details and try again."
                    .to_string()
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Gateway(_) | PaymentError::Processing(_) => StatusCode::PAYMENT_REQUIRED,
            PaymentError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRejection {
    MethodNotAllowed,
    MissingSecret,
    MissingSignature,
    MalformedSignature,
    SignatureMismatch,
    SignatureExpired,
    UnsupportedContentType,
    EmptyBody,
    InvalidJson,
    MissingFields,
    NotAnEvent,
}

impl WebhookRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookRejection::MethodNotAllowed => "method_not_allowed",
            WebhookRejection::MissingSecret => "missing_secret",
            WebhookRejection::MissingSignature => "missing_signature",
            WebhookRejection::MalformedSignature => "malformed_signature",
            WebhookRejection::SignatureMismatch => "signature_mismatch",
            WebhookRejection::SignatureExpired => "signature_expired",
            WebhookRejection::UnsupportedContentType => "unsupported_content_type",
            WebhookRejection::EmptyBody => "empty_body",
            WebhookRejection::InvalidJson => "invalid_json",
            WebhookRejection::MissingFields => "missing_fields",
            WebhookRejection::NotAnEvent => "not_an_event",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook rejected: {}", .0.as_str())]
    Rejected(WebhookRejection),

    #[error("webhook processing failed: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            WebhookError::Rejected(reason) => {
                tracing::warn!(reason = reason.as_str(), "webhook rejected");
                (StatusCode::BAD_REQUEST, "Invalid webhook request").into_response()
            }
            WebhookError::Internal(e) => {
                tracing::error!(error = %e, "webhook processing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_hide_details() {
        let err = PaymentError::Gateway("connect timeout to api.stripe.com".to_string());
        assert!(!err.user_message().contains("stripe"));
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);

        let err = PaymentError::Validation("Please enter your payment details.".to_string());
        assert_eq!(err.user_message(), "Please enter your payment details.");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_webhook_rejection_is_bad_request() {
        let response = WebhookError::Rejected(WebhookRejection::SignatureMismatch).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = WebhookError::Internal(anyhow::anyhow!("booking not found")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
