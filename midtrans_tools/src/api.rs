use std::{sync::Arc, time::Duration};

use log::*;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    config::MidtransConfig,
    data_objects::{ChargeApiResponse, StatusResponse, VaBank},
    MidtransApiError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Charges auto-expire at the gateway after this many minutes.
const CHARGE_EXPIRY_MINUTES: u32 = 15;

#[derive(Clone)]
pub struct MidtransApi {
    config: MidtransConfig,
    client: Arc<Client>,
}

impl MidtransApi {
    pub fn new(config: MidtransConfig) -> Result<Self, MidtransApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MidtransApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &MidtransConfig {
        &self.config
    }

    pub async fn rest_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, MidtransApiError> {
        let url = format!("{}{path}", self.config.base_url());
        trace!("Sending REST query: {url}");
        let mut req = self
            .client
            .request(method, url)
            .basic_auth(self.config.server_key.reveal(), Some(""))
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| MidtransApiError::TransportError(e.to_string()))?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| MidtransApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| MidtransApiError::TransportError(e.to_string()))?;
            Err(MidtransApiError::QueryError { status, message })
        }
    }

    /// Create a QRIS charge. The returned actions carry the QR image URL; `qr_string` holds the raw payload.
    pub async fn charge_qris(&self, order_id: &str, gross_amount: i64) -> Result<ChargeApiResponse, MidtransApiError> {
        let body = json!({
            "payment_type": "qris",
            "transaction_details": { "order_id": order_id, "gross_amount": gross_amount },
            "qris": { "acquirer": "gopay" },
            "custom_expiry": { "expiry_duration": CHARGE_EXPIRY_MINUTES, "unit": "minute" },
        });
        debug!("Creating QRIS charge for {order_id} ({gross_amount})");
        let response = self.rest_query(Method::POST, "/v2/charge", Some(body)).await?;
        info!("QRIS charge created for {order_id}");
        Ok(response)
    }

    /// Create a bank virtual-account charge.
    pub async fn charge_va(
        &self,
        order_id: &str,
        gross_amount: i64,
        bank: VaBank,
    ) -> Result<ChargeApiResponse, MidtransApiError> {
        let body = json!({
            "payment_type": "bank_transfer",
            "transaction_details": { "order_id": order_id, "gross_amount": gross_amount },
            "bank_transfer": { "bank": bank.as_str() },
            "custom_expiry": { "expiry_duration": CHARGE_EXPIRY_MINUTES, "unit": "minute" },
        });
        debug!("Creating {} VA charge for {order_id} ({gross_amount})", bank.as_str());
        let response = self.rest_query(Method::POST, "/v2/charge", Some(body)).await?;
        info!("VA charge created for {order_id}");
        Ok(response)
    }

    /// Query the status of a charge by gateway order id.
    ///
    /// A gateway-side 404 comes back as a normal response with `status_code = "404"` so callers can distinguish
    /// "no such transaction" from transport failure.
    pub async fn transaction_status(&self, order_id: &str) -> Result<StatusResponse, MidtransApiError> {
        let path = format!("/v2/{order_id}/status");
        match self.rest_query::<StatusResponse>(Method::GET, &path, None).await {
            Ok(status) => Ok(status),
            Err(MidtransApiError::QueryError { status: 404, .. }) => Ok(StatusResponse {
                status_code: "404".to_string(),
                order_id: Some(order_id.to_string()),
                transaction_status: None,
                fraud_status: None,
                gross_amount: None,
                signature_key: None,
            }),
            Err(e) => Err(e),
        }
    }
}
