//! Programmable stand-ins for the payment gateway and the hot wallet.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use rpg_common::TokenAmount;

use crate::traits::{
    ChargeRequest, ChargeResponse, GatewayStatus, PaymentProvider, PayoutWallet, ProviderError, WalletError,
};

/// A gateway whose per-order statuses are set up front.
#[derive(Default)]
pub struct MockProvider {
    statuses: Mutex<HashMap<String, GatewayStatus>>,
    /// When set, every status query fails with a transport error.
    pub unreachable: std::sync::atomic::AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, gateway_order_id: &str, status: GatewayStatus) {
        self.statuses.lock().unwrap().insert(gateway_order_id.to_string(), status);
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeResponse, ProviderError> {
        Ok(ChargeResponse {
            payment_url: Some(format!("https://pay.example/{}", request.gateway_order_id)),
            qr_string: Some("00020101021226".to_string()),
            va_number: Some("8808123456".to_string()),
            expiry_time: Some("15 minutes".to_string()),
        })
    }

    async fn transaction_status(&self, gateway_order_id: &str) -> Result<GatewayStatus, ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("mock gateway unreachable".into()));
        }
        let statuses = self.statuses.lock().unwrap();
        Ok(statuses.get(gateway_order_id).copied().unwrap_or(GatewayStatus::NotFound))
    }
}

/// What the mock wallet should do on the next send.
#[derive(Debug, Clone)]
pub enum SendScript {
    /// Succeed with this hash.
    Confirm(String),
    /// Raise `TxBroadcasted` with this hash.
    Broadcast(String),
    /// Fail with this RPC error text.
    Reject(String),
}

/// A wallet that plays back a script of send outcomes and counts its invocations.
pub struct MockWallet {
    script: Mutex<Vec<SendScript>>,
    pub sends: AtomicUsize,
}

impl MockWallet {
    pub fn confirming(tx_hash: &str) -> Self {
        Self::scripted(vec![SendScript::Confirm(tx_hash.to_string())])
    }

    pub fn scripted(script: Vec<SendScript>) -> Self {
        Self { script: Mutex::new(script), sends: AtomicUsize::new(0) }
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayoutWallet for MockWallet {
    async fn send_native(&self, _chain: &str, _to: &str, _amount: TokenAmount) -> Result<String, WalletError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match next {
            Some(SendScript::Confirm(hash)) => Ok(hash),
            Some(SendScript::Broadcast(hash)) => Err(WalletError::TxBroadcasted { tx_hash: hash }),
            Some(SendScript::Reject(message)) => Err(WalletError::Rpc(message)),
            None => Err(WalletError::Rpc("mock wallet script exhausted".into())),
        }
    }
}
