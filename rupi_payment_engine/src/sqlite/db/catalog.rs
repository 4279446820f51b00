use sqlx::SqliteConnection;

use crate::db_types::{Chain, Token};

pub async fn fetch_active_chains(conn: &mut SqliteConnection) -> Result<Vec<Chain>, sqlx::Error> {
    let chains = sqlx::query_as("SELECT * FROM chains WHERE active = 1 ORDER BY slug ASC").fetch_all(conn).await?;
    Ok(chains)
}

pub async fn fetch_chain(slug: &str, conn: &mut SqliteConnection) -> Result<Option<Chain>, sqlx::Error> {
    let chain =
        sqlx::query_as("SELECT * FROM chains WHERE slug = $1 AND active = 1").bind(slug).fetch_optional(conn).await?;
    Ok(chain)
}

pub async fn fetch_native_token(chain_slug: &str, conn: &mut SqliteConnection) -> Result<Option<Token>, sqlx::Error> {
    let token = sqlx::query_as("SELECT * FROM tokens WHERE chain = $1 AND is_native = 1 AND active = 1")
        .bind(chain_slug)
        .fetch_optional(conn)
        .await?;
    Ok(token)
}

pub async fn fetch_tokens_for_chain(chain_slug: &str, conn: &mut SqliteConnection) -> Result<Vec<Token>, sqlx::Error> {
    let tokens = sqlx::query_as("SELECT * FROM tokens WHERE chain = $1 AND active = 1 ORDER BY symbol ASC")
        .bind(chain_slug)
        .fetch_all(conn)
        .await?;
    Ok(tokens)
}
