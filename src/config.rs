use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpesaSettings {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    /// Shared secret for HMAC verification of inbound callbacks. When unset
    /// (sandbox and local runs) signature checking is skipped.
    pub callback_secret: Option<String>,
    /// Enables the gateway transaction-status probe used by manual receipt
    /// verification when no local evidence exists.
    #[serde(default)]
    pub lookup_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsSettings {
    /// Percentage of a requested refund that is actually paid out.
    #[serde(default = "default_refund_payout_percent")]
    pub refund_payout_percent: u32,
}

fn default_refund_payout_percent() -> u32 {
    80
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub mpesa: MpesaSettings,
    pub payments: PaymentsSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }
}
