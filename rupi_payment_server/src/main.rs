use dotenvy::dotenv;
use log::*;
use rupi_payment_server::{config::ServerConfig, server::run_server};

#[actix_web::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let config = ServerConfig::from_env_or_default();
    if !preflight_check(&config) {
        eprintln!("🚀️ Preflight check failed. Exiting. Check the logs for details.");
        return;
    }
    info!("🚀️ Starting server on {}:{}", config.host, config.port);
    match run_server(config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}

fn preflight_check(config: &ServerConfig) -> bool {
    let mut result = true;
    info!("🚦️ Running preflight checks...");
    if config.vault_password.reveal().len() < rupi_payment_engine::wallet::vault::MIN_PASSWORD_LEN {
        error!(
            "🚦️ Preflight check FAILED: RUPI_VAULT_PASSWORD must be at least {} characters.",
            rupi_payment_engine::wallet::vault::MIN_PASSWORD_LEN
        );
        result = false;
    }
    if config.midtrans.server_key.reveal().is_empty() {
        error!("🚦️ Preflight check FAILED: MIDTRANS_SERVER_KEY must be set.");
        result = false;
    }
    result
}
