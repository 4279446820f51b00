//! The hot wallet manager: decrypted signing keys, balance queries and the serialised `send_native` primitive.
//!
//! Keys and chain clients are process-wide singletons with explicit [`HotWalletManager::init`] and
//! [`HotWalletManager::refresh`] entry points; nothing mutates them piecemeal. Sends are serialised per chain
//! through the distributed mutex `lock:chain:<slug>`, so at most one transaction is in flight per chain no matter
//! how many payout workers run.
mod evm;
mod rlp;
pub mod send_error;
pub mod vault;

use std::{collections::HashMap, sync::Arc};

pub use evm::EvmClient;
use log::{info, warn};
use rpg_common::{Secret, TokenAmount};
use tokio::sync::RwLock;

use crate::{
    db_types::{Chain, ChainType},
    kv_store::{acquire_lock, KeyValueStore, LockError, LockOptions},
    traits::{ChainClient, PayoutWallet, WalletError},
};

/// Confirmation depth to configure for a well-known chain when registering it.
pub fn default_confirmations(slug: &str) -> u64 {
    match slug {
        "bsc" | "base" => 3,
        "polygon" => 5,
        "ethereum" => 1,
        _ => 3,
    }
}

pub struct HotWalletManager {
    clients: RwLock<HashMap<String, Arc<dyn ChainClient>>>,
    kv: Arc<dyn KeyValueStore>,
}

impl HotWalletManager {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { clients: RwLock::new(HashMap::new()), kv }
    }

    /// Decrypt every active chain's signing key and build its client. Called once at startup; call
    /// [`refresh`](Self::refresh) after the chain catalogue changes.
    ///
    /// Chains whose type has no send support are registered in the catalogue but get no client here; payouts and
    /// balance sync skip them.
    pub async fn init(&self, chains: &[Chain], password: &Secret<String>) -> Result<(), WalletError> {
        let mut built: HashMap<String, Arc<dyn ChainClient>> = HashMap::with_capacity(chains.len());
        for chain in chains {
            match chain.chain_type {
                ChainType::Evm => {
                    let key = vault::decrypt_signing_key(&chain.encrypted_key, password)?;
                    let client = EvmClient::new(
                        &chain.slug,
                        &chain.rpc_url,
                        chain.chain_id as u64,
                        chain.confirmations as u64,
                        &key,
                    )?;
                    built.insert(chain.slug.clone(), Arc::new(client));
                },
                other => {
                    warn!("🏦️ Chain {} has type {other}, which has no hot-wallet client; skipping", chain.slug);
                },
            }
        }
        info!("🏦️ Hot wallet manager initialised with {} chain(s)", built.len());
        *self.clients.write().await = built;
        Ok(())
    }

    /// Rebuild all clients from a fresh chain catalogue.
    pub async fn refresh(&self, chains: &[Chain], password: &Secret<String>) -> Result<(), WalletError> {
        self.init(chains, password).await
    }

    async fn client_for(&self, chain: &str) -> Result<Arc<dyn ChainClient>, WalletError> {
        let clients = self.clients.read().await;
        clients.get(chain).cloned().ok_or_else(|| WalletError::UnknownChain(chain.to_string()))
    }

    /// The hot wallet's own balance on the given chain. Used by the inventory syncer.
    pub async fn own_balance(&self, chain: &str) -> Result<TokenAmount, WalletError> {
        let client = self.client_for(chain).await?;
        let address = client.wallet_address().to_string();
        client.native_balance(&address).await
    }

    pub async fn estimate_fee(&self, chain: &str) -> Result<TokenAmount, WalletError> {
        let client = self.client_for(chain).await?;
        client.estimate_fee().await
    }

    /// Chains that currently have a client, i.e. can be synced and paid out from.
    pub async fn active_chains(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl PayoutWallet for HotWalletManager {
    async fn send_native(&self, chain: &str, to: &str, amount: TokenAmount) -> Result<String, WalletError> {
        let client = self.client_for(chain).await?;
        let lock_key = format!("lock:chain:{chain}");
        let lock = acquire_lock(self.kv.as_ref(), &lock_key, LockOptions::chain_send()).await.map_err(|e| match e {
            LockError::Acquisition(key) => WalletError::LockAcquisition(key),
            LockError::Backend(msg) => WalletError::Transport(msg),
        })?;
        let result = client.send_native(to, amount).await;
        lock.release(self.kv.as_ref()).await;
        result
    }
}
