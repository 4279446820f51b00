//! Recurring jobs and the payout consumer.
//!
//! Every job is a `tokio::spawn` interval loop owned by the [`WorkerRegistry`]; registering a name twice aborts the
//! stale handle first, so a re-initialisation can never leave duplicate schedules running.
use std::{collections::HashMap, sync::Arc, time::Duration};

use log::*;
use rupi_payment_engine::{
    db_types::OrderId,
    price::{rest, rest::MarketRestClient, PriceCache},
    traits::{CatalogManagement, PaymentProvider, VoucherManagement},
    wallet::HotWalletManager,
    ExchangeRateApi, OrderFlowApi, PayoutQueue, ReferralApi, SqliteDatabase,
};
use tokio::{sync::mpsc, sync::Semaphore, task::JoinHandle};

const PRICE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const INVENTORY_SYNC_INTERVAL: Duration = Duration::from_secs(60);
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const REFERRAL_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const VOUCHER_EXPIRY_INTERVAL: Duration = Duration::from_secs(60 * 60);
const REFERRAL_SWEEP_BATCH: i64 = 200;
/// Payouts across distinct chains may run in parallel up to this bound; per-chain serialisation is enforced below
/// by the wallet's chain mutex.
const PAYOUT_CONCURRENCY: usize = 20;

/// Owns the running worker handles. Registering a duplicate name aborts the previous instance first.
#[derive(Default)]
pub struct WorkerRegistry {
    handles: HashMap<String, JoinHandle<()>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handle: JoinHandle<()>) {
        if let Some(stale) = self.handles.insert(name.to_string(), handle) {
            warn!("🕰️ A '{name}' worker was already registered; aborting the stale one");
            stale.abort();
        }
    }

    pub fn abort_all(&mut self) {
        for (name, handle) in self.handles.drain() {
            debug!("🕰️ Stopping worker '{name}'");
            handle.abort();
        }
    }
}

/// REST price sweep plus the daily-ish FX refresh piggybacked on it.
pub fn start_price_refresh_worker(
    cache: Arc<PriceCache>,
    market: MarketRestClient,
    rates: ExchangeRateApi<SqliteDatabase>,
    symbols: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(PRICE_REFRESH_INTERVAL);
        info!("🕰️ Price refresh worker started for {} symbols", symbols.len());
        loop {
            timer.tick().await;
            match rest::refresh_all(&cache, &market, &symbols).await {
                Ok(count) => trace!("🕰️ Price sweep refreshed {count} symbols"),
                Err(e) => warn!("🕰️ Price sweep failed: {e}"),
            }
            // usd_idr() only hits the FX endpoint when the stored rate has gone stale.
            if let Err(e) = rates.usd_idr().await {
                warn!("🕰️ USD/IDR freshness check failed: {e}");
            }
        }
    })
}

/// Overwrites inventory balances from the hot wallets. Reservations are untouched.
pub fn start_inventory_sync_worker(db: SqliteDatabase, wallet: Arc<HotWalletManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(INVENTORY_SYNC_INTERVAL);
        info!("🕰️ Inventory sync worker started");
        loop {
            timer.tick().await;
            for chain in wallet.active_chains().await {
                let token = match db.fetch_native_token(&chain).await {
                    Ok(Some(token)) => token,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("🕰️ Could not resolve native token for {chain}: {e}");
                        continue;
                    },
                };
                match wallet.own_balance(&chain).await {
                    Ok(balance) => {
                        use rupi_payment_engine::traits::InventoryManagement;
                        if let Err(e) = db.sync_inventory_balance(&chain, &token.symbol, balance).await {
                            warn!("🕰️ Could not sync inventory for {chain}/{}: {e}", token.symbol);
                        } else {
                            trace!("🕰️ Synced {chain}/{} balance to {balance}", token.symbol);
                        }
                    },
                    Err(e) => warn!("🕰️ Could not read hot wallet balance on {chain}: {e}"),
                }
            }
        }
    })
}

/// Starts the expiry worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_expiry_worker(
    api: Arc<OrderFlowApi<SqliteDatabase>>,
    provider: Arc<dyn PaymentProvider>,
    queue: PayoutQueue,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        info!("🕰️ Order expiry worker started");
        loop {
            timer.tick().await;
            match api.expire_sweep(provider.as_ref()).await {
                Ok(result) => {
                    if result.total_count() > 0 {
                        info!(
                            "🕰️ Expiry sweep: {} expired, {} diverted to payment, {} rescued",
                            result.expired.len(),
                            result.diverted.len(),
                            result.rescued.len()
                        );
                    }
                    for order in result.diverted.into_iter().chain(result.rescued) {
                        queue.enqueue(order.order_id).await;
                    }
                },
                Err(e) => error!("🕰️ Error running order expiry job: {e}"),
            }
        }
    })
}

pub fn start_referral_worker(api: Arc<ReferralApi<SqliteDatabase>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(REFERRAL_SWEEP_INTERVAL);
        info!("🕰️ Referral sweep worker started");
        loop {
            timer.tick().await;
            match api.sweep(REFERRAL_SWEEP_BATCH).await {
                Ok(granted) if granted > 0 => info!("🕰️ Referral sweep granted {granted} reward(s)"),
                Ok(_) => {},
                Err(e) => error!("🕰️ Error running referral sweep: {e}"),
            }
        }
    })
}

pub fn start_voucher_expiry_worker(db: SqliteDatabase) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(VOUCHER_EXPIRY_INTERVAL);
        info!("🕰️ Voucher expiry worker started");
        loop {
            timer.tick().await;
            match db.expire_vouchers().await {
                Ok(0) => {},
                Ok(count) => info!("🕰️ Deactivated {count} expired voucher(s)"),
                Err(e) => error!("🕰️ Error expiring vouchers: {e}"),
            }
        }
    })
}

/// The payout consumer: up to [`PAYOUT_CONCURRENCY`] orders in flight, each attempted exactly once. A blockchain
/// send is never retried automatically; failures either finalise, refund, or freeze for the recovery paths.
pub fn start_payout_consumer(
    api: Arc<OrderFlowApi<SqliteDatabase>>,
    wallet: Arc<HotWalletManager>,
    mut jobs: mpsc::Receiver<OrderId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(PAYOUT_CONCURRENCY));
        info!("🏦️ Payout consumer started ({PAYOUT_CONCURRENCY} concurrent)");
        while let Some(order_id) = jobs.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let api = api.clone();
            let wallet = wallet.clone();
            tokio::spawn(async move {
                match api.process_order(&order_id, wallet.as_ref()).await {
                    Ok(outcome) => debug!("🏦️ Payout job for {order_id} finished: {outcome:?}"),
                    // No retry: the zombie-steal path and admin retry are the only ways back in.
                    Err(e) => error!("🏦️ Payout job for {order_id} failed: {e}"),
                }
                drop(permit);
            });
        }
        warn!("🏦️ Payout queue closed; consumer shutting down");
    })
}
