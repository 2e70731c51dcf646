//! Configuration
//!
//! Layered from an optional TOML file and `TRADER__<SECTION>__<KEY>`
//! environment variables (a `.env` file is honoured). String values that
//! point at secrets or paths go through `shellexpand`, so
//! `api_key = "${ALPHA_VANTAGE_API_KEY}"` works.

use crate::error::{Result, TraderError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Starting cash for a new or reset account
pub const DEFAULT_INITIAL_BALANCE: Decimal = dec!(10000.00);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long a fetched quote is reused; 0 disables the cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC key mixed into every password hash
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Hours a login token stays valid
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "data/trader.db".to_string()
}

fn default_base_url() -> String {
    "https://www.alphavantage.co".to_string()
}

fn default_api_key() -> String {
    "${ALPHA_VANTAGE_API_KEY:-demo}".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_initial_balance() -> Decimal {
    DEFAULT_INITIAL_BALANCE
}

fn default_secret() -> String {
    "${TRADER_SECRET:-insecure-dev-secret}".to_string()
}

fn default_session_ttl_hours() -> u32 {
    crate::auth::DEFAULT_SESSION_TTL_HOURS
}

impl Config {
    /// Load configuration from a TOML file (optional) and the environment
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        if !Path::new(path).exists() {
            tracing::warn!("Config file {} not found, using defaults and environment", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.expanded()
    }

    /// Expand `${VAR}` and `~` in secrets and paths
    pub fn expanded(mut self) -> Result<Self> {
        self.market_data.api_key = expand(&self.market_data.api_key)?;
        self.database.path = expand(&self.database.path)?;
        self.auth.secret = expand(&self.auth.secret)?;

        if self.auth.secret == "insecure-dev-secret" {
            tracing::warn!("auth.secret is the development default; set TRADER_SECRET");
        }
        Ok(self)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn expand(value: &str) -> Result<String> {
    shellexpand::full(value)
        .map(|s| s.into_owned())
        .map_err(|e| TraderError::Config(config::ConfigError::Message(e.to_string())))
}
