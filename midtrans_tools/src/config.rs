use std::env;

use log::*;
use rpg_common::{helpers::parse_boolean_flag, Secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidtransEnvironment {
    #[default]
    Sandbox,
    Production,
}

#[derive(Clone, Default)]
pub struct MidtransConfig {
    pub environment: MidtransEnvironment,
    pub server_key: Secret<String>,
}

impl MidtransConfig {
    pub fn new(environment: MidtransEnvironment, server_key: Secret<String>) -> Self {
        Self { environment, server_key }
    }

    /// Reads `MIDTRANS_SERVER_KEY` and `MIDTRANS_PRODUCTION` from the environment.
    pub fn from_env_or_default() -> Self {
        let server_key = env::var("MIDTRANS_SERVER_KEY").map(Secret::new).unwrap_or_else(|_| {
            error!("MIDTRANS_SERVER_KEY is not set. Gateway calls will be rejected.");
            Secret::default()
        });
        let production = parse_boolean_flag(env::var("MIDTRANS_PRODUCTION").ok(), false);
        let environment =
            if production { MidtransEnvironment::Production } else { MidtransEnvironment::Sandbox };
        Self { environment, server_key }
    }

    pub fn base_url(&self) -> &'static str {
        match self.environment {
            MidtransEnvironment::Sandbox => "https://api.sandbox.midtrans.com",
            MidtransEnvironment::Production => "https://api.midtrans.com",
        }
    }
}
