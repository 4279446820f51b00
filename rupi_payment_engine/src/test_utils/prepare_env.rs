//! Scratch databases for the integration suites.
//!
//! Every test gets its own throwaway SQLite file under `data/`, dropped and recreated on entry so runs never see
//! each other's rows and a crashed run leaves nothing a later one can trip over.
use log::debug;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

use crate::SqliteDatabase;

/// A database URL with a random suffix, so parallel test binaries cannot collide.
pub fn scratch_db_url() -> String {
    format!("sqlite://../data/test_store_{:016x}", rand::random::<u64>())
}

/// Drop any previous incarnation of the database at `url`, recreate it, and bring the schema up to date.
pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    if let Err(e) = Sqlite::drop_database(url).await {
        debug!("🧪️ Nothing to drop at {url} ({e})");
    }
    Sqlite::create_database(url).await.expect("Could not create the scratch database");
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Could not connect to the scratch database");
    migrate!("./migrations").run(db.pool()).await.expect("Schema migration failed on the scratch database");
    debug!("🧪️ Scratch database ready at {url}");
}
