use serde::{Deserialize, Serialize};

/// Gateway transaction statuses that mean the money is in.
pub const SETTLED_STATUSES: [&str; 2] = ["settlement", "paid"];
const FAILED_STATUSES: [&str; 4] = ["deny", "cancel", "expire", "failure"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaBank {
    Bca,
    Bni,
    Bri,
    Permata,
}

impl VaBank {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaBank::Bca => "bca",
            VaBank::Bni => "bni",
            VaBank::Bri => "bri",
            VaBank::Permata => "permata",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeAction {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaNumber {
    pub bank: String,
    pub va_number: String,
}

/// Response of `POST /v2/charge`. Only the fields the gateway integration consumes are modelled; Midtrans sends
/// plenty more.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeApiResponse {
    pub status_code: String,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub transaction_status: Option<String>,
    #[serde(default)]
    pub actions: Vec<ChargeAction>,
    /// QRIS payload, when the charge was QRIS.
    pub qr_string: Option<String>,
    #[serde(default)]
    pub va_numbers: Vec<VaNumber>,
    pub expiry_time: Option<String>,
}

impl ChargeApiResponse {
    /// The user-facing payment URL, when the gateway issued one.
    pub fn payment_url(&self) -> Option<String> {
        self.actions
            .iter()
            .find(|a| a.name == "generate-qr-code" || a.name == "deeplink-redirect")
            .map(|a| a.url.clone())
    }

    pub fn va_number(&self) -> Option<String> {
        self.va_numbers.first().map(|v| v.va_number.clone())
    }
}

/// Response of `GET /v2/{order_id}/status`, which shares its shape with the webhook notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status_code: String,
    pub order_id: Option<String>,
    pub transaction_status: Option<String>,
    pub fraud_status: Option<String>,
    pub gross_amount: Option<String>,
    pub signature_key: Option<String>,
}

/// The engine-relevant reduction of a gateway status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentClass {
    Settled,
    Pending,
    Failed,
    NotFound,
}

impl StatusResponse {
    /// Success iff `transaction_status` is settlement/paid, or capture with fraud accept; failed iff the gateway
    /// closed the transaction; everything else is still pending.
    pub fn classify(&self) -> PaymentClass {
        if self.status_code == "404" {
            return PaymentClass::NotFound;
        }
        let status = self.transaction_status.as_deref().unwrap_or_default();
        if SETTLED_STATUSES.contains(&status)
            || (status == "capture" && self.fraud_status.as_deref() == Some("accept"))
        {
            PaymentClass::Settled
        } else if FAILED_STATUSES.contains(&status) {
            PaymentClass::Failed
        } else {
            PaymentClass::Pending
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn status(transaction_status: &str, fraud: Option<&str>) -> StatusResponse {
        StatusResponse {
            status_code: "200".into(),
            order_id: Some("RP-1".into()),
            transaction_status: Some(transaction_status.into()),
            fraud_status: fraud.map(String::from),
            gross_amount: Some("100000.00".into()),
            signature_key: None,
        }
    }

    #[test]
    fn classification() {
        assert_eq!(status("settlement", None).classify(), PaymentClass::Settled);
        assert_eq!(status("paid", None).classify(), PaymentClass::Settled);
        assert_eq!(status("capture", Some("accept")).classify(), PaymentClass::Settled);
        assert_eq!(status("capture", Some("challenge")).classify(), PaymentClass::Pending);
        assert_eq!(status("deny", None).classify(), PaymentClass::Failed);
        assert_eq!(status("cancel", None).classify(), PaymentClass::Failed);
        assert_eq!(status("expire", None).classify(), PaymentClass::Failed);
        assert_eq!(status("failure", None).classify(), PaymentClass::Failed);
        assert_eq!(status("pending", None).classify(), PaymentClass::Pending);
        let mut missing = status("pending", None);
        missing.status_code = "404".into();
        assert_eq!(missing.classify(), PaymentClass::NotFound);
    }
}
