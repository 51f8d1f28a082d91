//! Gateway configuration

use crate::forwarder::ForwarderConfig;
use crate::{GatewayError, Result};
use igate_core::backoff::{self, Backoff};
use igate_core::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when no `--config` is given
pub const CONFIG_PATH_ENV: &str = "IGATE_CONFIG_PATH";

/// Config file used when nothing else is specified
pub const DEFAULT_CONFIG_PATH: &str = "igate.toml";

/// Only supported config format version
pub const CONFIG_VERSION: u32 = 1;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Config format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Station identity
    pub station: StationConfig,

    /// APRS-IS uplink
    #[serde(default)]
    pub aprs: AprsConfig,

    /// KISS TNC input
    #[serde(default)]
    pub kiss: KissConfig,
}

/// Station identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Gateway callsign, with optional SSID
    pub callsign: String,

    /// APRS-IS passcode
    pub passcode: String,

    /// Destination used in place of the radio's own for locally originated packets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_tocall: Option<String>,
}

/// APRS-IS uplink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AprsConfig {
    #[serde(default = "default_aprs_server")]
    pub server: String,

    #[serde(default = "default_aprs_port")]
    pub port: u16,

    /// Server-side filter appended to the login line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Connect/login/send timeout (seconds)
    #[serde(default = "default_aprs_timeout")]
    pub timeout_secs: u64,

    /// First reconnect delay after a failed connect (seconds)
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_secs: u64,

    /// Longest reconnect delay (seconds)
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

/// KISS TCP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KissConfig {
    #[serde(default = "default_kiss_host")]
    pub host: String,

    #[serde(default = "default_kiss_port")]
    pub port: u16,

    /// Connect timeout (seconds)
    #[serde(default = "default_kiss_timeout")]
    pub timeout_secs: u64,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_aprs_server() -> String {
    "noam.aprs2.net".to_string()
}

fn default_aprs_port() -> u16 {
    igate_core::aprsis::DEFAULT_APRSIS_PORT
}

fn default_aprs_timeout() -> u64 {
    5
}

fn default_reconnect_base() -> u64 {
    backoff::DEFAULT_BASE_DELAY.as_secs()
}

fn default_reconnect_max() -> u64 {
    backoff::DEFAULT_MAX_DELAY.as_secs()
}

fn default_kiss_host() -> String {
    "127.0.0.1".to_string()
}

fn default_kiss_port() -> u16 {
    igate_core::kiss_client::DEFAULT_KISS_PORT
}

fn default_kiss_timeout() -> u64 {
    2
}

impl Default for AprsConfig {
    fn default() -> Self {
        Self {
            server: default_aprs_server(),
            port: default_aprs_port(),
            filter: None,
            timeout_secs: default_aprs_timeout(),
            reconnect_base_secs: default_reconnect_base(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

impl Default for KissConfig {
    fn default() -> Self {
        Self {
            host: default_kiss_host(),
            port: default_kiss_port(),
            timeout_secs: default_kiss_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            station: StationConfig {
                callsign: "N0CALL".to_string(),
                passcode: "-1".to_string(),
                software_tocall: None,
            },
            aprs: AprsConfig::default(),
            kiss: KissConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&contents)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Check the values that cannot be defaulted
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(GatewayError::Config(format!(
                "Unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.station.callsign.trim().is_empty() {
            return Err(GatewayError::Config("station.callsign must be set".into()));
        }
        if self.station.passcode.trim().is_empty() {
            return Err(GatewayError::Config("station.passcode must be set".into()));
        }
        self.backoff()?;
        Ok(())
    }

    /// APRS-IS client settings for this station
    pub fn relay_config(&self) -> RelayConfig {
        let mut relay = RelayConfig::new(
            &self.aprs.server,
            self.aprs.port,
            &self.station.callsign,
            &self.station.passcode,
        );
        relay.filter = self.aprs.filter.clone();
        relay.timeout = Duration::from_secs(self.aprs.timeout_secs);
        relay
    }

    /// Forwarding policy settings for this station
    pub fn forwarder_config(&self) -> ForwarderConfig {
        let mut forwarder = ForwarderConfig::new(&self.station.callsign);
        forwarder.software_tocall = self.station.software_tocall.clone();
        forwarder
    }

    /// Reconnect schedule for the APRS-IS session
    pub fn backoff(&self) -> Result<Backoff> {
        Ok(Backoff::new(
            Duration::from_secs(self.aprs.reconnect_base_secs),
            Duration::from_secs(self.aprs.reconnect_max_secs),
            backoff::DEFAULT_MULTIPLIER,
        )?)
    }

    /// KISS connect timeout
    pub fn kiss_timeout(&self) -> Duration {
        Duration::from_secs(self.kiss.timeout_secs)
    }
}

/// Pick the config file: explicit path, then the environment, then the default
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with(cli, std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

fn resolve_config_path_with(cli: Option<PathBuf>, env: Option<PathBuf>) -> PathBuf {
    cli.or(env)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
