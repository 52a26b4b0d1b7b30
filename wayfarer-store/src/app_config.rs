use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No URL means the in-memory store.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

/// No URL means no rate limiting.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Use the in-process gateway instead of calling the provider.
    #[serde(default)]
    pub mock: bool,
}

fn default_base_url() -> String {
    "https://api.razorpay.com".to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_vendor_cut")]
    pub default_vendor_cut_percent: u8,
    #[serde(default)]
    pub platform_fee_percent: u8,
    #[serde(default = "default_tolerance")]
    pub amount_tolerance: i64,
    #[serde(default = "default_max_people")]
    pub max_people: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_vendor_cut() -> u8 { 85 }
fn default_tolerance() -> i64 { 1 }
fn default_max_people() -> u32 { 10 }
fn default_rate_limit() -> i64 { 120 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            default_vendor_cut_percent: default_vendor_cut(),
            platform_fee_percent: 0,
            amount_tolerance: default_tolerance(),
            max_people: default_max_people(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // WAYFARER__GATEWAY__KEY_SECRET=... sets gateway.key_secret
            .add_source(config::Environment::with_prefix("WAYFARER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
