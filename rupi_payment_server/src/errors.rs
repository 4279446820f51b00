use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rupi_payment_engine::{
    engine_api::{ConversationError, QuoteError},
    traits::PaymentGatewayError,
    OrderFlowError,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),
    #[error("The requested resource does not exist")]
    NotFound,
    #[error("You are not allowed to access this resource")]
    Forbidden,
    #[error("Too many requests; slow down")]
    RateLimited,
    #[error("Another operation is in progress; try again shortly")]
    Busy,
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    OrderFlow(#[from] OrderFlowError),
    #[error("{0}")]
    Quote(#[from] QuoteError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl From<ConversationError> for ServerError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::Busy => ServerError::Busy,
            ConversationError::PriceMoved => ServerError::Validation(e.to_string()),
            ConversationError::Store(msg) => ServerError::Unspecified(msg),
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Busy => StatusCode::CONFLICT,
            Self::OrderFlow(e) => order_flow_status(e),
            Self::Quote(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

fn order_flow_status(e: &OrderFlowError) -> StatusCode {
    match e {
        OrderFlowError::Database(PaymentGatewayError::PendingOrderExists(_)) => StatusCode::CONFLICT,
        OrderFlowError::Database(PaymentGatewayError::OrderNotFound(_)) => StatusCode::NOT_FOUND,
        OrderFlowError::Database(PaymentGatewayError::OrderNotPending(_))
        | OrderFlowError::Database(PaymentGatewayError::CancelForbidden { .. })
        | OrderFlowError::InvalidAddress(_)
        | OrderFlowError::BelowChainMinimum
        | OrderFlowError::NonPositiveAmount => StatusCode::BAD_REQUEST,
        OrderFlowError::Database(PaymentGatewayError::VoucherError(_))
        | OrderFlowError::Database(PaymentGatewayError::InventoryError(_)) => StatusCode::CONFLICT,
        OrderFlowError::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
