//! Configuration for the verification server and scanning devices
//!
//! One TOML document carries both sides; each binary reads the sections it
//! needs. Every key can be overridden from the environment as
//! `GATECHECK_<SECTION>_<KEY>`, e.g. `GATECHECK_SERVER_BIND_ADDRESS`.

use crate::core_device::{InternalErrorPolicy, TimeoutTable};
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "GATECHECK";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub device: DeviceConfig,
    pub scanner: ScannerConfig,
    pub dispatcher: DispatcherConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Verification endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Bearer token to organization id
    pub api_tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
}

/// Identity and storage of one scanning device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub queue_path: PathBuf,
    pub server_url: String,
    pub org_id: String,
    pub api_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Repeats of the same code inside this window are dropped
    #[serde(with = "humantime_serde")]
    pub debounce_window: Duration,

    /// How long a result stays up without acknowledgement
    #[serde(with = "humantime_serde")]
    pub auto_dismiss: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub internal_error_policy: InternalErrorPolicy,
    pub timeouts: TimeoutTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde")]
    pub periodic_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            shutdown_timeout: Duration::from_secs(10),
            api_tokens: BTreeMap::new(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { db_path: PathBuf::from("./data/ledger.db"), max_connections: 8 }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from("./data/offline-queue.db"),
            server_url: "http://127.0.0.1:8080".to_string(),
            org_id: String::new(),
            api_token: String::new(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(1500),
            auto_dismiss: Duration::from_secs(3),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { periodic_interval: Duration::from_secs(60) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&contents)?)
    }

    /// File (when given) then environment, validated once at the end
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        override_parsed("SERVER_BIND_ADDRESS", &mut self.server.bind_address)?;
        override_duration("SERVER_SHUTDOWN_TIMEOUT", &mut self.server.shutdown_timeout)?;
        if let Some(raw) = lookup("SERVER_API_TOKENS") {
            self.server.api_tokens = parse_token_map(&raw)?;
        }

        // Ledger
        override_parsed("LEDGER_DB_PATH", &mut self.ledger.db_path)?;
        override_parsed("LEDGER_MAX_CONNECTIONS", &mut self.ledger.max_connections)?;

        // Device
        override_parsed("DEVICE_QUEUE_PATH", &mut self.device.queue_path)?;
        override_parsed("DEVICE_SERVER_URL", &mut self.device.server_url)?;
        override_parsed("DEVICE_ORG_ID", &mut self.device.org_id)?;
        override_parsed("DEVICE_API_TOKEN", &mut self.device.api_token)?;

        // Scanner
        override_duration("SCANNER_DEBOUNCE_WINDOW", &mut self.scanner.debounce_window)?;
        override_duration("SCANNER_AUTO_DISMISS", &mut self.scanner.auto_dismiss)?;

        // Dispatcher
        let timeouts = &mut self.dispatcher.timeouts;
        override_duration("DISPATCHER_TIMEOUTS_SLOW_2G", &mut timeouts.slow_2g)?;
        override_duration("DISPATCHER_TIMEOUTS_TWO_G", &mut timeouts.two_g)?;
        override_duration("DISPATCHER_TIMEOUTS_THREE_G", &mut timeouts.three_g)?;
        override_duration("DISPATCHER_TIMEOUTS_FOUR_G", &mut timeouts.four_g)?;
        override_duration("DISPATCHER_TIMEOUTS_UNKNOWN", &mut timeouts.unknown)?;
        if let Some(raw) = lookup("DISPATCHER_INTERNAL_ERROR_POLICY") {
            self.dispatcher.internal_error_policy = match raw.as_str() {
                "surface" => InternalErrorPolicy::Surface,
                "queue_offline" => InternalErrorPolicy::QueueOffline,
                other => {
                    return Err(invalid(
                        "DISPATCHER_INTERNAL_ERROR_POLICY",
                        format!("expected surface or queue_offline, got '{}'", other),
                    ))
                }
            };
        }

        // Sync
        override_duration("SYNC_PERIODIC_INTERVAL", &mut self.sync.periodic_interval)?;

        // Logging
        override_parsed("LOGGING_LEVEL", &mut self.logging.level)?;
        override_parsed("LOGGING_JSON_FORMAT", &mut self.logging.json_format)?;
        override_parsed("LOGGING_WITH_TIMESTAMP", &mut self.logging.with_timestamp)?;
        override_parsed("LOGGING_WITH_TARGET", &mut self.logging.with_target)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_connections == 0 {
            return Err(ConfigError::ValidationFailed(
                "ledger.max_connections must be greater than 0".to_string(),
            ));
        }

        if let Some((token, _)) = self.server.api_tokens.iter().find(|(t, org)| t.is_empty() || org.is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "server.api_tokens has an empty token or organization (token '{}')",
                token
            )));
        }

        if self.dispatcher.timeouts.all().iter().any(Duration::is_zero) {
            return Err(ConfigError::ValidationFailed(
                "dispatcher timeouts must be greater than 0".to_string(),
            ));
        }

        if self.sync.periodic_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync.periodic_interval must be greater than 0".to_string(),
            ));
        }

        if self.scanner.auto_dismiss.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "scanner.auto_dismiss must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Checks only a scanning device needs
    pub fn validate_device(&self) -> Result<(), ConfigError> {
        if self.device.org_id.is_empty() {
            return Err(ConfigError::ValidationFailed("device.org_id is required".to_string()));
        }
        if self.device.server_url.is_empty() {
            return Err(ConfigError::ValidationFailed("device.server_url is required".to_string()));
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;

        Ok(())
    }
}

fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key)
}

fn lookup(key: &str) -> Option<String> {
    env::var(env_key(key)).ok()
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { key: env_key(key), message: message.into() }
}

fn override_parsed<T>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.parse().map_err(|e: T::Err| invalid(key, e.to_string()))?;
    }
    Ok(())
}

fn override_duration(key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *slot = humantime::parse_duration(&raw).map_err(|e| invalid(key, e.to_string()))?;
    }
    Ok(())
}

/// `token=org,token=org`
fn parse_token_map(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((token, org)) => Ok((token.trim().to_string(), org.trim().to_string())),
            None => Err(invalid("SERVER_API_TOKENS", format!("expected token=org, got '{}'", pair))),
        })
        .collect()
}
