use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::*;
use midtrans_tools::MidtransApi;
use rpg_common::Secret;
use rupi_payment_engine::{
    apply_migrations,
    events::{EventHandlers, EventHooks},
    kv_store::{KeyValueStore, MemoryKvStore},
    price::{rest::MarketRestClient, stream, stream::PriceStreamConfig, PriceCache, PriceReader},
    traits::{CatalogManagement, PaymentProvider},
    wallet::HotWalletManager,
    ExchangeRateApi, OrderFlowApi, PayoutQueue, QuoteApi, ReferralApi, SqliteDatabase,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::midtrans::MidtransProvider,
    middleware::RateLimitFactory,
    routes::{admin_mark_success, admin_retry, cancel_order, create_order, health, pay_order, quote, sync_order},
    webhook::payment_webhook,
    workers,
};

const PAYOUT_QUEUE_CAPACITY: usize = 256;
const EVENT_BUFFER_SIZE: usize = 32;

/// Everything the request handlers need.
pub struct AppState {
    pub orders: Arc<OrderFlowApi<SqliteDatabase>>,
    pub quotes: QuoteApi<SqliteDatabase>,
    pub provider: Arc<dyn PaymentProvider>,
    pub payout_queue: PayoutQueue,
    pub server_key: Secret<String>,
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    apply_migrations(&db).await.map_err(|e| ServerError::ConfigurationError(e.to_string()))?;

    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let cache = Arc::new(PriceCache::new());
    let market = MarketRestClient::new(config.market_rest_url.as_deref());
    let reader = PriceReader::new(cache.clone(), kv.clone(), market.clone());
    let rates = ExchangeRateApi::new(db.clone(), config.fx_url.as_deref(), config.default_usd_idr);

    // Referral-reward notifications get their own handler set so the referral API can exist before the order
    // hooks (which call into it) are wired up.
    let mut reward_hooks = EventHooks::default();
    reward_hooks.on_referral_reward(|ev| {
        Box::pin(async move {
            info!(
                "🎉️ User {} earned voucher {}{}",
                ev.referrer_id,
                ev.voucher_code,
                if ev.milestone { " (milestone bonus)" } else { "" }
            );
        })
    });
    let reward_handlers = EventHandlers::new(EVENT_BUFFER_SIZE, reward_hooks);
    let referrals = Arc::new(ReferralApi::new(db.clone(), reward_handlers.producers()));

    let mut hooks = EventHooks::default();
    let referrals_for_hook = referrals.clone();
    hooks.on_order_completed(move |ev| {
        let referrals = referrals_for_hook.clone();
        Box::pin(async move {
            info!(
                "🎉️ Order {} complete: {} {} sent in {}",
                ev.order.order_id, ev.order.amount_token, ev.order.symbol, ev.tx_hash
            );
            if let Err(e) = referrals.validate(ev.order.user_id).await {
                warn!("🤝️ Post-payout referral validation failed for user {}: {e}", ev.order.user_id);
            }
        })
    });
    hooks.on_order_annulled(|ev| {
        Box::pin(async move {
            info!("ℹ️ Order {} ended as {}", ev.order.order_id, ev.status);
        })
    });
    hooks.on_payout_stuck(|ev| {
        Box::pin(async move {
            error!(
                "🚨️ OPERATOR ALERT: order {} is stuck in Processing ({}). Manual review required.",
                ev.order.order_id, ev.error
            );
        })
    });
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let orders = Arc::new(OrderFlowApi::new(db.clone(), handlers.producers()));
    reward_handlers.start_handlers().await;
    handlers.start_handlers().await;

    // Hot wallets.
    let chains = db.fetch_active_chains().await.map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let wallet = Arc::new(HotWalletManager::new(kv.clone()));
    wallet
        .init(&chains, &config.vault_password)
        .await
        .map_err(|e| ServerError::ConfigurationError(format!("Hot wallet init failed: {e}")))?;

    // Gateway.
    let midtrans = MidtransApi::new(config.midtrans.clone())
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let provider: Arc<dyn PaymentProvider> = Arc::new(MidtransProvider::new(midtrans));

    // Workers.
    let (payout_queue, payout_jobs) = PayoutQueue::new(PAYOUT_QUEUE_CAPACITY);
    let mut native_symbols = Vec::new();
    for chain in &chains {
        if let Ok(Some(token)) = db.fetch_native_token(&chain.slug).await {
            native_symbols.push(token.symbol);
        }
    }
    let mut registry = workers::WorkerRegistry::new();
    let mut stream_config = PriceStreamConfig::new(native_symbols.clone());
    if let Some(url) = &config.price_stream_url {
        stream_config.url = url.clone();
    }
    registry.register("price-stream", stream::start_price_stream(cache.clone(), stream_config));
    registry.register(
        "price-refresh",
        workers::start_price_refresh_worker(cache.clone(), market, rates.clone(), native_symbols),
    );
    registry.register("inventory-sync", workers::start_inventory_sync_worker(db.clone(), wallet.clone()));
    registry.register(
        "order-expiry",
        workers::start_expiry_worker(orders.clone(), provider.clone(), payout_queue.clone()),
    );
    registry.register("referral-sweep", workers::start_referral_worker(referrals.clone()));
    registry.register("voucher-expiry", workers::start_voucher_expiry_worker(db.clone()));
    registry.register(
        "payout-consumer",
        workers::start_payout_consumer(orders.clone(), wallet.clone(), payout_jobs),
    );

    let state = web::Data::new(AppState {
        orders,
        quotes: QuoteApi::new(db.clone(), reader, rates),
        provider,
        payout_queue,
        server_key: config.midtrans.server_key.clone(),
    });

    let kv_for_app = kv.clone();
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U"))
            .wrap(RateLimitFactory::generic(kv_for_app.clone()))
            .app_data(state.clone())
            .service(health)
            .service(quote)
            .service(payment_webhook)
            .service(
                web::resource("/orders")
                    .wrap(RateLimitFactory::order_creation(kv_for_app.clone()))
                    .route(web::post().to(create_order)),
            )
            .service(pay_order)
            .service(sync_order)
            .service(cancel_order)
            .service(admin_retry)
            .service(admin_mark_success)
    })
    .bind((config.host.as_str(), config.port))?
    .run();
    let result = srv.await.map_err(ServerError::IOError);
    registry.abort_all();
    result
}
