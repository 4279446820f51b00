pub mod db;
mod sqlite_impl;

pub use sqlite_impl::SqliteDatabase;

/// Bring the schema up to date. Called once at server startup.
pub async fn apply_migrations(db: &SqliteDatabase) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(db.pool()).await
}
