//! JSON-RPC client for EVM chains, including legacy-transaction signing.
//!
//! The payout path deliberately uses legacy (pre-EIP-1559) transactions with a 10% gas price boost: every target
//! chain accepts them, and a single fee field keeps the replacement semantics simple.
use std::time::Duration;

use k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};
use log::{debug, warn};
use rpg_common::{Secret, TokenAmount};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};

use super::rlp;
use crate::{helpers::checksum_address, traits::WalletError};

/// Gas for a plain native transfer.
const NATIVE_TRANSFER_GAS: u128 = 21_000;
/// Receipt poll cadence while awaiting confirmations.
const CONFIRMATION_POLL: Duration = Duration::from_secs(3);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EvmClient {
    slug: String,
    rpc_url: String,
    client: reqwest::Client,
    chain_id: u64,
    confirmations: u64,
    signing_key: SigningKey,
    address: String,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    block_number: String,
    status: Option<String>,
}

impl EvmClient {
    pub fn new(
        slug: &str,
        rpc_url: &str,
        chain_id: u64,
        confirmations: u64,
        key_hex: &Secret<String>,
    ) -> Result<Self, WalletError> {
        let key_bytes =
            hex::decode(key_hex.reveal()).map_err(|_| WalletError::Key("Signing key is not valid hex".into()))?;
        let signing_key =
            SigningKey::from_slice(&key_bytes).map_err(|e| WalletError::Key(format!("Unusable signing key: {e}")))?;
        let address = derive_address(&signing_key)?;
        debug!("🏦️ Hot wallet for {slug} is {address}");
        Ok(Self {
            slug: slug.to_string(),
            rpc_url: rpc_url.to_string(),
            client: reqwest::Client::new(),
            chain_id,
            confirmations: confirmations.max(1),
            signing_key,
            address,
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .map_err(|e| WalletError::Transport(e.to_string()))?;
        let parsed: RpcResponse =
            response.json().await.map_err(|e| WalletError::Transport(format!("Malformed RPC response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(WalletError::Rpc(error.message));
        }
        parsed.result.ok_or_else(|| WalletError::Rpc(format!("{method} returned neither result nor error")))
    }

    async fn rpc_quantity(&self, method: &str, params: Value) -> Result<u128, WalletError> {
        let result = self.rpc_call(method, params).await?;
        let raw = result.as_str().ok_or_else(|| WalletError::Rpc(format!("{method} did not return a quantity")))?;
        parse_quantity(raw)
    }

    async fn transaction_count(&self) -> Result<u128, WalletError> {
        self.rpc_quantity("eth_getTransactionCount", json!([self.address, "latest"])).await
    }

    async fn gas_price(&self) -> Result<u128, WalletError> {
        self.rpc_quantity("eth_gasPrice", json!([])).await
    }

    async fn block_number(&self) -> Result<u128, WalletError> {
        self.rpc_quantity("eth_blockNumber", json!([])).await
    }

    /// Await the configured number of confirmations for a broadcast transaction. Any failure here (timeout,
    /// transport, malformed receipt) surfaces as [`WalletError::TxBroadcasted`]: the money may be in flight and
    /// the caller must not treat this as a safe failure.
    async fn await_confirmations(&self, tx_hash: &str) -> Result<(), WalletError> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(60) + CONFIRMATION_POLL * (self.confirmations as u32) * 10;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(CONFIRMATION_POLL).await;
            let receipt = match self.rpc_call("eth_getTransactionReceipt", json!([tx_hash])).await {
                Ok(Value::Null) => continue,
                Ok(value) => value,
                Err(e) => {
                    warn!("🏦️ Receipt poll for {tx_hash} failed: {e}");
                    continue;
                },
            };
            let receipt: Receipt = match serde_json::from_value(receipt) {
                Ok(r) => r,
                Err(e) => {
                    warn!("🏦️ Unreadable receipt for {tx_hash}: {e}");
                    continue;
                },
            };
            if receipt.status.as_deref() == Some("0x0") {
                // The transaction is on-chain but reverted; no value moved. This is the one post-broadcast case
                // that is safe to classify as a failure.
                return Err(WalletError::Rpc("execution reverted".into()));
            }
            let mined_in = parse_quantity(&receipt.block_number)?;
            let current = self.block_number().await.unwrap_or(mined_in);
            let seen = current.saturating_sub(mined_in) + 1;
            if seen >= self.confirmations as u128 {
                debug!("🏦️ {tx_hash} has {seen} confirmations on {}", self.slug);
                return Ok(());
            }
        }
        Err(WalletError::TxBroadcasted { tx_hash: tx_hash.to_string() })
    }

    fn sign_transfer(&self, nonce: u128, gas_price: u128, to: &str, value_wei: u128) -> Result<Vec<u8>, WalletError> {
        let to_bytes = hex::decode(to.trim_start_matches("0x"))
            .map_err(|_| WalletError::InvalidAddress(to.to_string()))?;
        let base_fields = |items: &mut Vec<rlp::Item>| {
            items.push(rlp::Item::uint(nonce));
            items.push(rlp::Item::uint(gas_price));
            items.push(rlp::Item::uint(NATIVE_TRANSFER_GAS));
            items.push(rlp::Item::bytes(&to_bytes));
            items.push(rlp::Item::uint(value_wei));
            items.push(rlp::Item::bytes(&[]));
        };

        // EIP-155: the preimage list ends with (chain_id, 0, 0).
        let mut unsigned = Vec::with_capacity(9);
        base_fields(&mut unsigned);
        unsigned.push(rlp::Item::uint(self.chain_id as u128));
        unsigned.push(rlp::Item::uint(0));
        unsigned.push(rlp::Item::uint(0));
        let preimage = rlp::encode(&rlp::Item::List(unsigned));
        let digest = Keccak256::digest(&preimage);

        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| WalletError::Key(format!("Signing failed: {e}")))?;
        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);
        let v = self.chain_id * 2 + 35 + recovery_id.to_byte() as u64;

        let mut signed = Vec::with_capacity(9);
        base_fields(&mut signed);
        signed.push(rlp::Item::uint(v as u128));
        signed.push(rlp::Item::bytes(trim_leading_zeros(r)));
        signed.push(rlp::Item::bytes(trim_leading_zeros(s)));
        Ok(rlp::encode(&rlp::Item::List(signed)))
    }
}

#[async_trait::async_trait]
impl crate::traits::ChainClient for EvmClient {
    fn wallet_address(&self) -> &str {
        &self.address
    }

    async fn native_balance(&self, address: &str) -> Result<TokenAmount, WalletError> {
        let address = checksum_address(address).map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        let wei = self.rpc_quantity("eth_getBalance", json!([address, "latest"])).await?;
        wei_to_amount(wei)
    }

    async fn estimate_fee(&self) -> Result<TokenAmount, WalletError> {
        let gas_price = self.gas_price().await?;
        wei_to_amount(gas_price * NATIVE_TRANSFER_GAS)
    }

    async fn send_native(&self, to: &str, amount: TokenAmount) -> Result<String, WalletError> {
        let to = checksum_address(to).map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        let value_wei = amount_to_wei(amount)?;
        // Nonce is refetched at `latest` on every send; the per-chain mutex above us guarantees no concurrent
        // sender can race it.
        let nonce = self.transaction_count().await?;
        let gas_price = self.gas_price().await?;
        let boosted = gas_price + gas_price / 10;
        let raw_tx = self.sign_transfer(nonce, boosted, &to, value_wei)?;
        let raw_hex = format!("0x{}", hex::encode(raw_tx));

        let result = self.rpc_call("eth_sendRawTransaction", json!([raw_hex])).await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| WalletError::Rpc("eth_sendRawTransaction did not return a hash".into()))?
            .to_string();
        debug!("🏦️ Broadcast {tx_hash} on {}: {} wei to {to} (nonce {nonce})", self.slug, value_wei);

        match self.await_confirmations(&tx_hash).await {
            Ok(()) => Ok(tx_hash),
            // Reverted-on-chain comes back as an Rpc error and must propagate as-is.
            Err(e) => Err(e),
        }
    }
}

fn derive_address(key: &SigningKey) -> Result<String, WalletError> {
    let encoded = key.verifying_key().to_encoded_point(false);
    let public = encoded.as_bytes();
    // Uncompressed SEC1 is 0x04 || X || Y; the address is the last 20 bytes of keccak(X || Y).
    let digest = Keccak256::digest(&public[1..]);
    let address = format!("0x{}", hex::encode(&digest[12..]));
    checksum_address(&address).map_err(|e| WalletError::Key(format!("Derived address is invalid: {e}")))
}

fn parse_quantity(raw: &str) -> Result<u128, WalletError> {
    let stripped = raw.trim_start_matches("0x");
    u128::from_str_radix(stripped, 16).map_err(|_| WalletError::Rpc(format!("'{raw}' is not a hex quantity")))
}

/// Whole tokens -> wei. Rejects amounts with sub-wei precision loss only by truncation (the quote path always
/// produces <= 18 decimal places).
fn amount_to_wei(amount: TokenAmount) -> Result<u128, WalletError> {
    let scale = Decimal::from(10u64.pow(9)) * Decimal::from(10u64.pow(9));
    let wei = amount.value().checked_mul(scale).ok_or(WalletError::AmountOutOfRange(amount))?;
    wei.trunc().to_u128().ok_or(WalletError::AmountOutOfRange(amount))
}

fn wei_to_amount(wei: u128) -> Result<TokenAmount, WalletError> {
    if wei >= 1u128 << 96 {
        return Err(WalletError::Rpc(format!("Balance {wei} wei cannot be represented exactly")));
    }
    Ok(TokenAmount::from(Decimal::from_i128_with_scale(wei as i128, 18)))
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::wallet::ChainClient;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn client() -> EvmClient {
        EvmClient::new("bsc", "http://localhost:8545", 56, 3, &Secret::new(TEST_KEY.to_string())).unwrap()
    }

    #[test]
    fn derives_checksummed_address() {
        let client = client();
        let address = client.wallet_address();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert_eq!(checksum_address(address).unwrap(), address);
    }

    #[test]
    fn wei_conversions_are_exact() {
        assert_eq!(amount_to_wei(TokenAmount::from(dec!(0.009248))).unwrap(), 9_248_000_000_000_000);
        assert_eq!(amount_to_wei(TokenAmount::from(dec!(1))).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(wei_to_amount(9_248_000_000_000_000).unwrap(), TokenAmount::from(dec!(0.009248)));
    }

    #[test]
    fn quantities_parse_from_hex() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn signed_transfer_is_stable() {
        let client = client();
        let raw = client
            .sign_transfer(7, 5_000_000_000, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", 9_248_000_000_000_000)
            .unwrap();
        // Deterministic ECDSA (RFC 6979): same inputs, same bytes.
        let again = client
            .sign_transfer(7, 5_000_000_000, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", 9_248_000_000_000_000)
            .unwrap();
        assert_eq!(raw, again);
        // The payload is a long-form RLP list.
        assert!(raw.len() > 100);
        assert!(raw[0] >= 0xf7);
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(EvmClient::new("bsc", "http://x", 56, 3, &Secret::new("nothex".into())).is_err());
        assert!(EvmClient::new("bsc", "http://x", 56, 3, &Secret::new("00".repeat(32))).is_err());
    }
}
