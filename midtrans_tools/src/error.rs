use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MidtransApiError {
    #[error("Could not initialize the Midtrans API client. {0}")]
    Initialization(String),
    #[error("Error sending request to Midtrans. {0}")]
    TransportError(String),
    #[error("Midtrans rejected the request ({status}): {message}")]
    QueryError { status: u16, message: String },
    #[error("Error decoding Midtrans response into JSON. {0}")]
    JsonError(String),
    #[error("No transaction exists for order id {0}")]
    TransactionNotFound(String),
}
