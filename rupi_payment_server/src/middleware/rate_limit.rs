//! Fixed-window rate limiting over the engine's key-value store.
//!
//! Each scope (generic traffic, order creation) counts requests per caller per window; the caller key is the
//! upstream-injected user id when present, otherwise the peer address. Counters live in the KV space with the
//! window length as their TTL, so a multi-node deployment sharing a networked store shares limits too.
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use log::warn;
use rupi_payment_engine::kv_store::KeyValueStore;

use crate::errors::ServerError;

pub struct RateLimitFactory {
    kv: Arc<dyn KeyValueStore>,
    scope: String,
    limit: i64,
    window: Duration,
}

impl RateLimitFactory {
    pub fn new(kv: Arc<dyn KeyValueStore>, scope: &str, limit: i64, window: Duration) -> Self {
        Self { kv, scope: scope.to_string(), limit, window }
    }

    /// The blanket limit: 100 requests per minute.
    pub fn generic(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::new(kv, "generic", 100, Duration::from_secs(60))
    }

    /// Order creation: 10 per hour per user.
    pub fn order_creation(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::new(kv, "orders", 10, Duration::from_secs(3600))
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = RateLimitService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            kv: self.kv.clone(),
            scope: self.scope.clone(),
            limit: self.limit,
            window: self.window,
            service: Rc::new(service),
        }))
    }
}

pub struct RateLimitService<S> {
    kv: Arc<dyn KeyValueStore>,
    scope: String,
    limit: i64,
    window: Duration,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let kv = self.kv.clone();
        let scope = self.scope.clone();
        let limit = self.limit;
        let window = self.window;
        Box::pin(async move {
            let caller = req
                .headers()
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .or_else(|| req.peer_addr().map(|a| a.ip().to_string()))
                .unwrap_or_else(|| "anonymous".to_string());
            let key = format!("rl:{scope}:{caller}");
            match kv.incr(&key, window).await {
                Ok(count) if count > limit => {
                    warn!("🚧️ Rate limit hit for {caller} in scope {scope} ({count}/{limit})");
                    return Err(ServerError::RateLimited.into());
                },
                Ok(_) => {},
                Err(e) => {
                    // A broken limiter must not take the API down.
                    warn!("🚧️ Rate limit store error for {key}: {e}");
                },
            }
            service.call(req).await
        })
    }
}
