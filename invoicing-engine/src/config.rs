use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Invoice number prefix; numbers are formatted `PREFIX-0001`.
    #[serde(default = "default_invoice_prefix")]
    pub invoice_prefix: String,
    /// Days added to the issue date when no due date is supplied.
    #[serde(default = "default_due_days")]
    pub due_days: i64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_url() -> String {
    "sqlite://invoicing.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_invoice_prefix() -> String {
    "FAC".to_string()
}

fn default_due_days() -> i64 {
    4
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            invoice_prefix: default_invoice_prefix(),
            due_days: default_due_days(),
            cache_ttl_secs: default_cache_ttl_secs(),
            log_level: default_log_level(),
        }
    }
}
