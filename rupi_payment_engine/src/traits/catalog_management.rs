use thiserror::Error;

use crate::db_types::{Chain, Token};

/// Read access to the chain and token catalogue. Mutation happens through admin tooling outside the engine; the
/// engine treats the catalogue as a slowly changing singleton loaded at startup and on explicit refresh.
#[allow(async_fn_in_trait)]
pub trait CatalogManagement: Clone + Send + Sync {
    async fn fetch_active_chains(&self) -> Result<Vec<Chain>, CatalogError>;

    async fn fetch_chain(&self, slug: &str) -> Result<Option<Chain>, CatalogError>;

    /// The chain's base asset. At most one token per chain carries `is_native`.
    async fn fetch_native_token(&self, chain_slug: &str) -> Result<Option<Token>, CatalogError>;

    async fn fetch_tokens_for_chain(&self, chain_slug: &str) -> Result<Vec<Token>, CatalogError>;
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("Chain '{0}' is not registered or not active")]
    ChainNotFound(String),
    #[error("Chain '{0}' has no native token configured")]
    NoNativeToken(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        CatalogError::DatabaseError(e.to_string())
    }
}
