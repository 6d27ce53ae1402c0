//! Configuration file support for ghifp.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (GHIFP_PORT, GHIFP_BAUD)
//! 3. Local config file (./ghifp.toml)
//! 4. Global config file (~/.config/ghifp/config.toml)

use {
    directories::ProjectDirs,
    ghifp::{CatalogPolicy, ConfigPolicy, DriverConfig, FlowControl, RetryPolicy},
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local config file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "ghifp.toml";

/// Serial line settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Use RTS/CTS flow control.
    pub hardware_flow: Option<bool>,
    /// Port read timeout in milliseconds.
    pub read_timeout_ms: Option<u64>,
}

/// Driver settings. Unset fields keep the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverSection {
    /// Firmware packet size in bytes.
    pub packet_size: Option<usize>,
    /// Binary input packet size in bytes.
    pub binary_input_packet_size: Option<usize>,
    /// Response timeout in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Status change timeout in milliseconds.
    pub status_timeout_ms: Option<u64>,
    /// Delay after a serial configure request in milliseconds.
    pub serial_settle_ms: Option<u64>,
    /// Reject out-of-range configure values instead of warning.
    pub strict_configure: Option<bool>,
    /// Let opcodes marked unsupported through raw writes.
    pub permissive_catalog: Option<bool>,
    /// Confirm status changes through unsolicited events.
    pub status_change_events: Option<bool>,
}

/// Block read retry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    /// Total attempts, including the first.
    pub attempts: Option<u32>,
    /// Delay before the second attempt in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Upper bound on the delay between attempts in milliseconds.
    pub max_backoff_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Driver settings.
    #[serde(default)]
    pub driver: DriverSection,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ghifp").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Fields set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            driver,
            retry,
        } = other;

        let c = &mut self.connection;
        c.serial = connection.serial.or(c.serial.take());
        c.baud = connection.baud.or(c.baud);
        c.hardware_flow = connection.hardware_flow.or(c.hardware_flow);
        c.read_timeout_ms = connection.read_timeout_ms.or(c.read_timeout_ms);

        let d = &mut self.driver;
        d.packet_size = driver.packet_size.or(d.packet_size);
        d.binary_input_packet_size = driver
            .binary_input_packet_size
            .or(d.binary_input_packet_size);
        d.response_timeout_ms = driver.response_timeout_ms.or(d.response_timeout_ms);
        d.status_timeout_ms = driver.status_timeout_ms.or(d.status_timeout_ms);
        d.serial_settle_ms = driver.serial_settle_ms.or(d.serial_settle_ms);
        d.strict_configure = driver.strict_configure.or(d.strict_configure);
        d.permissive_catalog = driver.permissive_catalog.or(d.permissive_catalog);
        d.status_change_events = driver.status_change_events.or(d.status_change_events);

        let r = &mut self.retry;
        r.attempts = retry.attempts.or(r.attempts);
        r.initial_backoff_ms = retry.initial_backoff_ms.or(r.initial_backoff_ms);
        r.max_backoff_ms = retry.max_backoff_ms.or(r.max_backoff_ms);
    }

    /// Flow control for the serial line.
    pub fn flow_control(&self) -> FlowControl {
        FlowControl::from(
            self.connection
                .hardware_flow
                .unwrap_or(false),
        )
    }

    /// Port read timeout, if configured.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.connection
            .read_timeout_ms
            .map(Duration::from_millis)
    }

    /// Library settings with the configured overrides applied.
    pub fn driver_config(&self) -> DriverConfig {
        let d = &self.driver;
        let mut config = DriverConfig::default();

        if let Some(size) = d.packet_size {
            config = config.with_packet_size(size);
        }
        if let Some(size) = d.binary_input_packet_size {
            config = config.with_binary_input_packet_size(size);
        }
        if let Some(ms) = d.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = d.status_timeout_ms {
            config = config.with_status_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = d.serial_settle_ms {
            config = config.with_serial_settle(Duration::from_millis(ms));
        }
        if d.strict_configure == Some(true) {
            config = config.with_config_policy(ConfigPolicy::Strict);
        }
        if d.permissive_catalog == Some(true) {
            config = config.with_catalog_policy(CatalogPolicy::Permissive);
        }
        if let Some(enabled) = d.status_change_events {
            config = config.with_status_change_events(enabled);
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            attempts: self
                .retry
                .attempts
                .unwrap_or(defaults.attempts),
            initial_backoff: self
                .retry
                .initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .retry
                .max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
        };
        config.with_retry(retry)
    }
}
