//! Acceptor configuration with TOML file support.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration for the reference kiosk.

use crate::application::controller::ControllerSettings;
use crate::domain::denomination::{DEFAULT_TOLERANCE, Denomination, DenominationTable};
use crate::domain::ports::Pin;
use crate::error::ConfigError;
use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptorConfig {
    pub device: DeviceConfig,
    pub api: ApiConfig,
    pub gpio: GpioConfig,
    pub transaction: TransactionConfig,
    /// Replaces the built-in table when non-empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denominations: Vec<Denomination>,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// `GET /invoice/device/{id}`
    #[default]
    Device,
    /// `GET /invoice/`
    All,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub token_source: TokenSource,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "bic01".to_string(),
            token_source: TokenSource::Device,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Timeout for invoice detail and payment submission.
    pub request_timeout_ms: u64,
    /// Timeout for the token listing poll.
    pub discovery_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-dev.xpdisi.id".to_string(),
            request_timeout_ms: 5_000,
            discovery_timeout_ms: 1_000,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioDriver {
    #[default]
    Sysfs,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub driver: GpioDriver,
    pub pulse_pin: u8,
    pub enable_pin: u8,
    pub sysfs_root: PathBuf,
    pub poll_interval_us: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            driver: GpioDriver::Sysfs,
            pulse_pin: 14,
            enable_pin: 15,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            poll_interval_us: 500,
        }
    }
}

impl GpioConfig {
    pub fn pulse_pin(&self) -> Pin {
        Pin(self.pulse_pin)
    }

    pub fn enable_pin(&self) -> Pin {
        Pin(self.enable_pin)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub debounce_ms: u64,
    pub burst_quiet_ms: u64,
    /// Absolute timeout, measured from the last customer activity.
    pub timeout_secs: u64,
    /// Maximum token age accepted by discovery.
    pub freshness_secs: u64,
    pub discovery_backoff_ms: u64,
    pub tick_ms: u64,
    pub retry_ceiling: u32,
    pub tolerance: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            burst_quiet_ms: 2_000,
            timeout_secs: 15,
            freshness_secs: 180,
            discovery_backoff_ms: 1_000,
            tick_ms: 1_000,
            retry_ceiling: 2,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"debug,bill_acceptor=trace"`.
    pub level: String,
    pub format: LogFormat,
    /// Append-only log file. Logs go to stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            file: None,
        }
    }
}

impl AcceptorConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.denomination_table()
            .validate()
            .map_err(ConfigError::Invalid)?;

        let tx = &self.transaction;
        if tx.tick_ms == 0 {
            return Err(ConfigError::Invalid("transaction.tick_ms must be positive".into()));
        }
        if tx.timeout_secs == 0 {
            return Err(ConfigError::Invalid("transaction.timeout_secs must be positive".into()));
        }
        // A burst must be able to close before the transaction can time out,
        // and a single edge must not span a whole burst window.
        if Duration::from_secs(tx.timeout_secs) <= Duration::from_millis(tx.burst_quiet_ms) {
            return Err(ConfigError::Invalid(format!(
                "transaction.timeout_secs ({}s) must exceed transaction.burst_quiet_ms ({}ms)",
                tx.timeout_secs, tx.burst_quiet_ms
            )));
        }
        if tx.debounce_ms >= tx.burst_quiet_ms {
            return Err(ConfigError::Invalid(format!(
                "transaction.debounce_ms ({}) must be below transaction.burst_quiet_ms ({})",
                tx.debounce_ms, tx.burst_quiet_ms
            )));
        }
        if self.gpio.pulse_pin == self.gpio.enable_pin {
            return Err(ConfigError::Invalid(format!(
                "gpio.pulse_pin and gpio.enable_pin are both {}",
                self.gpio.pulse_pin
            )));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url is empty".into()));
        }
        Ok(())
    }

    pub fn denomination_table(&self) -> DenominationTable {
        if self.denominations.is_empty() {
            DenominationTable::default()
        } else {
            DenominationTable::from_denominations(&self.denominations)
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        let tx = &self.transaction;
        ControllerSettings {
            pulse_pin: self.gpio.pulse_pin(),
            enable_pin: self.gpio.enable_pin(),
            debounce: Duration::from_millis(tx.debounce_ms),
            burst_quiet: Duration::from_millis(tx.burst_quiet_ms),
            absolute_timeout: Duration::from_secs(tx.timeout_secs),
            freshness: Duration::from_secs(tx.freshness_secs),
            discovery_backoff: Duration::from_millis(tx.discovery_backoff_ms),
            tick: Duration::from_millis(tx.tick_ms),
            retry_ceiling: tx.retry_ceiling,
            tolerance: tx.tolerance,
            denominations: self.denomination_table(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amount::Amount;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AcceptorConfig::from_toml_str("").unwrap();
        assert_eq!(config, AcceptorConfig::default());
        assert_eq!(config.gpio.pulse_pin, 14);
        assert_eq!(config.gpio.enable_pin, 15);
        assert_eq!(config.transaction.retry_ceiling, 2);
        assert_eq!(config.device.id, "bic01");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = AcceptorConfig::from_toml_str(
            r#"
            [transaction]
            timeout_secs = 30

            [status]
            enabled = true
            bind = "127.0.0.1:8080"
            "#,
        )
        .unwrap();
        assert_eq!(config.transaction.timeout_secs, 30);
        assert_eq!(config.transaction.debounce_ms, 50);
        assert!(config.status.enabled);
        assert_eq!(config.status.bind.port(), 8080);
    }

    #[test]
    fn test_custom_denominations_replace_table() {
        let config = AcceptorConfig::from_toml_str(
            r#"
            [[denominations]]
            pulses = 1
            amount = 100

            [[denominations]]
            pulses = 2
            amount = 200
            "#,
        )
        .unwrap();
        let table = config.denomination_table();
        assert_eq!(table.amount_for(2), Some(Amount::new(200)));
        assert_eq!(table.amount_for(5), None);
    }

    #[test]
    fn test_table_without_rule_keys_is_rejected() {
        let result = AcceptorConfig::from_toml_str(
            r#"
            [[denominations]]
            pulses = 5
            amount = 5000
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_shared_pins_are_rejected() {
        let result = AcceptorConfig::from_toml_str("[gpio]\npulse_pin = 4\nenable_pin = 4\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_timeout_must_outlast_a_burst() {
        let result = AcceptorConfig::from_toml_str("[transaction]\ntimeout_secs = 1\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = AcceptorConfig::from_toml_str(
            "[transaction]\ntimeout_secs = 2\nburst_quiet_ms = 2000\n",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = AcceptorConfig::from_toml_str(
            "[transaction]\ntimeout_secs = 1\nburst_quiet_ms = 300\n",
        )
        .unwrap();
        assert_eq!(config.transaction.timeout_secs, 1);
    }

    #[test]
    fn test_debounce_must_be_shorter_than_burst_quiet() {
        let result = AcceptorConfig::from_toml_str(
            "[transaction]\ndebounce_ms = 300\nburst_quiet_ms = 300\n",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result = AcceptorConfig::from_toml_str("[transaction\ntimeout_secs = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = AcceptorConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(AcceptorConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_controller_settings_conversion() {
        let settings = AcceptorConfig::default().controller_settings();
        assert_eq!(settings.absolute_timeout, Duration::from_secs(15));
        assert_eq!(settings.freshness, Duration::from_secs(180));
        assert_eq!(settings.debounce, Duration::from_millis(50));
        assert_eq!(settings.enable_pin, Pin(15));
    }
}
