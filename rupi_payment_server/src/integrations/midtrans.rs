//! Adapts the standalone Midtrans client to the engine's `PaymentProvider` seam.
use async_trait::async_trait;
use midtrans_tools::{MidtransApi, MidtransApiError, PaymentClass, VaBank};
use rupi_payment_engine::{
    db_types::PaymentMethod,
    traits::{ChargeRequest, ChargeResponse, GatewayStatus, PaymentProvider, ProviderError},
};

pub struct MidtransProvider {
    api: MidtransApi,
    va_bank: VaBank,
}

impl MidtransProvider {
    pub fn new(api: MidtransApi) -> Self {
        Self { api, va_bank: VaBank::Bca }
    }
}

fn map_midtrans_error(e: MidtransApiError) -> ProviderError {
    match e {
        MidtransApiError::QueryError { status, message } => ProviderError::Rejected { status, message },
        MidtransApiError::JsonError(msg) => ProviderError::MalformedResponse(msg),
        other => ProviderError::Transport(other.to_string()),
    }
}

#[async_trait]
impl PaymentProvider for MidtransProvider {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeResponse, ProviderError> {
        let amount = request.gross_amount.value();
        let response = match request.method {
            PaymentMethod::Qris => self.api.charge_qris(&request.gateway_order_id, amount).await.map_err(map_midtrans_error)?,
            PaymentMethod::Va => self
                .api
                .charge_va(&request.gateway_order_id, amount, self.va_bank)
                .await
                .map_err(map_midtrans_error)?,
        };
        Ok(ChargeResponse {
            payment_url: response.payment_url(),
            qr_string: response.qr_string.clone(),
            va_number: response.va_number(),
            expiry_time: response.expiry_time.clone(),
        })
    }

    async fn transaction_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ProviderError> {
        let status = self.api.transaction_status(gateway_order_id).await.map_err(map_midtrans_error)?;
        let mapped = match status.classify() {
            PaymentClass::Settled => GatewayStatus::Settled,
            PaymentClass::Pending => GatewayStatus::Pending,
            PaymentClass::Failed => GatewayStatus::Failed,
            PaymentClass::NotFound => GatewayStatus::NotFound,
        };
        Ok(mapped)
    }
}
