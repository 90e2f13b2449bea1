//! Configuration loader for the `aquasense` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, time::Duration};

use anyhow::{anyhow, bail, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional interval (seconds) environment variable, rejecting zero.
macro_rules! parse_env_secs {
    ($var_name:expr, $default:expr) => {{
        let secs = env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default);
        if secs == 0 {
            bail!("{} must be greater than zero", $var_name);
        }
        Duration::from_secs(secs)
    }};
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_THINGSPEAK_URL: &str = "https://api.thingspeak.com";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string of the primary (system of record) store.
    pub db_url: String,

    /// PostgreSQL connection string of the secondary (backup/analytics) store.
    pub backup_db_url: String,

    /// Maximum number of database connections per pool.
    pub db_pool_max: u32,

    /// Port the HTTP server binds to.
    pub listen_port: u16,

    /// Remote telemetry provider settings.
    pub thingspeak: ThingSpeakConfig,

    /// Sample-ingestion period.
    pub ingest_interval: Duration,

    /// Backup-sync period.
    pub backup_interval: Duration,

    /// Actuator-reconciliation period.
    pub reconcile_interval: Duration,

    /// Delay before the first reconciliation after startup.
    pub reconcile_initial_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ThingSpeakConfig {
    pub base_url: String,
    pub channel_id: String,
    pub read_api_key: String,
    pub write_api_key: String,
    /// Number of recent entries requested by a live read.
    pub latest_results: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – primary PostgreSQL connection string
/// - `BACKUP_DATABASE_URL` – secondary PostgreSQL connection string
/// - `THINGSPEAK_CHANNEL_ID`, `THINGSPEAK_READ_API_KEY`, `THINGSPEAK_WRITE_API_KEY`
///
/// Optional:
/// - `THINGSPEAK_BASE_URL` (default: `https://api.thingspeak.com`)
/// - `THINGSPEAK_LATEST_RESULTS` (default: 1)
/// - `DB_POOL_MAX` (default: 5), `LISTEN_PORT` (default: 8080)
/// - `INGEST_INTERVAL_SECS` (30), `BACKUP_INTERVAL_SECS` (1800),
///   `RECONCILE_INTERVAL_SECS` (120), `RECONCILE_INITIAL_DELAY_SECS` (10)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let backup_db_url = require_env!("BACKUP_DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let listen_port = parse_env_u32!("LISTEN_PORT", 8080);
    let listen_port =
        u16::try_from(listen_port).map_err(|_| anyhow!("Invalid LISTEN_PORT: {listen_port}"))?;

    let latest_results = parse_env_u32!("THINGSPEAK_LATEST_RESULTS", 1);
    if latest_results == 0 {
        bail!("THINGSPEAK_LATEST_RESULTS must be greater than zero");
    }

    let thingspeak = ThingSpeakConfig {
        base_url: env::var("THINGSPEAK_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_THINGSPEAK_URL.to_string())
            .trim_end_matches('/')
            .to_string(),
        channel_id: require_env!("THINGSPEAK_CHANNEL_ID"),
        read_api_key: require_env!("THINGSPEAK_READ_API_KEY"),
        write_api_key: require_env!("THINGSPEAK_WRITE_API_KEY"),
        latest_results,
    };

    Ok(Config {
        db_url,
        backup_db_url,
        db_pool_max,
        listen_port,
        thingspeak,
        ingest_interval: parse_env_secs!("INGEST_INTERVAL_SECS", 30),
        backup_interval: parse_env_secs!("BACKUP_INTERVAL_SECS", 1800),
        reconcile_interval: parse_env_secs!("RECONCILE_INTERVAL_SECS", 120),
        reconcile_initial_delay: parse_env_secs!("RECONCILE_INITIAL_DELAY_SECS", 10),
    })
}

/// Mask the password segment of a connection URL (`user:pass@host` -> `user:****@host`).
pub fn mask_db_url(url: &str) -> String {
    // ---
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // `postgres://host@...` has its only colon in the scheme
            if url[..colon_pos].ends_with("postgres") || url[..colon_pos].ends_with("postgresql")
            {
                return url.to_string();
            }
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}

/// Mask an API key, keeping only its last four characters.
fn mask_key(key: &str) -> String {
    let visible: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{visible}")
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and API keys while
    /// showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_db_url(&self.db_url));
        tracing::info!("  BACKUP_DATABASE_URL   : {}", mask_db_url(&self.backup_db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT           : {}", self.listen_port);
        tracing::info!("  THINGSPEAK_BASE_URL   : {}", self.thingspeak.base_url);
        tracing::info!("  THINGSPEAK_CHANNEL_ID : {}", self.thingspeak.channel_id);
        tracing::info!("  THINGSPEAK_READ_KEY   : {}", mask_key(&self.thingspeak.read_api_key));
        tracing::info!("  THINGSPEAK_WRITE_KEY  : {}", mask_key(&self.thingspeak.write_api_key));
        tracing::info!("  LATEST_RESULTS        : {}", self.thingspeak.latest_results);
        tracing::info!("  INGEST_INTERVAL       : {:?}", self.ingest_interval);
        tracing::info!("  BACKUP_INTERVAL       : {:?}", self.backup_interval);
        tracing::info!("  RECONCILE_INTERVAL    : {:?}", self.reconcile_interval);
        tracing::info!("  RECONCILE_DELAY       : {:?}", self.reconcile_initial_delay);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn masks_password_in_db_url() {
        // ---
        assert_eq!(
            mask_db_url("postgres://aqua:s3cret@db:5432/aquaponia"),
            "postgres://aqua:****@db:5432/aquaponia"
        );
    }

    #[test]
    fn leaves_url_without_password_alone() {
        // ---
        assert_eq!(
            mask_db_url("postgres://db:5432/aquaponia"),
            "postgres://db:5432/aquaponia"
        );
        assert_eq!(
            mask_db_url("postgres://aqua@db/aquaponia"),
            "postgres://aqua@db/aquaponia"
        );
    }

    #[test]
    fn masks_api_keys() {
        // ---
        assert_eq!(mask_key("5UWNQD21RD2A7QHG"), "****7QHG");
        assert_eq!(mask_key("ab"), "****ab");
    }
}
