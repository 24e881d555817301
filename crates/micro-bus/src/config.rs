//! # Bus Configuration
//!
//! Three sources, applied in this order by callers that want them all:
//!
//! 1. [`BusConfig::default`] or a TOML file ([`TomlConfigProvider`])
//! 2. `mbus.*` properties ([`BusConfig::from_properties`])
//! 3. `MBUS_*` environment variables ([`BusConfig::with_env_overrides`])
//!
//! ## Property Keys
//!
//! | Key                | Meaning                                  | Default |
//! |--------------------|------------------------------------------|---------|
//! | `mbus.addr`        | Interface IPv4 address                   | auto    |
//! | `mbus.mask`        | Interface netmask                        | auto    |
//! | `mbus.port`        | UDP bus port                             | 7943    |
//! | `mbus.bridge.port` | TCP bridge port (0 = ephemeral)          | 0       |
//! | `mbus.heartbeat.ms`| Heartbeat interval                       | 10000   |
//! | `mbus.expiry.ms`   | Remote node expiry                       | 60000   |
//! | `mbus.poll.ms`     | I/O poll wait                            | 1000    |
//! | `mbus.shutdown.ms` | Bounded I/O thread join on shutdown      | 2000    |
//! | `mbus.delivery.ms` | Reliable delivery timeout                | 5000    |
//! | `mbus.bridge.idle.ms` | Idle bridge connection close         | 30000   |
//! | `mbus.recv.buffer` | UDP receive buffer bytes                 | 131072  |
//! | `mbus.acl`         | `allow:10.0.0.0/8,deny:0.0.0.0/0`        | empty   |

use mbus_net::{
    AclEntry, DEFAULT_BRIDGE_IDLE_MS, DEFAULT_BUS_PORT, DEFAULT_EXPIRY_MS, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECV_BUFFER_BYTES,
};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bounded wait for the I/O thread on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Default timeout of a reliable delivery.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// ERRORS
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Failed to read {path}: {error}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Error message from the I/O operation.
        error: String,
    },

    /// TOML parsing error.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value could not be parsed for its key.
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Property key.
        key: String,
        /// Value as given.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration as a whole is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// CONFIG
// =============================================================================

/// Network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Interface address; resolved automatically when `None`.
    pub address: Option<Ipv4Addr>,
    /// Interface netmask; taken from the interface when `None`.
    pub netmask: Option<Ipv4Addr>,
    /// UDP bus port.
    pub port: u16,
    /// TCP bridge port; `0` picks an ephemeral port.
    pub bridge_port: u16,
    /// Requested UDP receive buffer size.
    pub recv_buffer_bytes: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            address: None,
            netmask: None,
            port: DEFAULT_BUS_PORT,
            bridge_port: 0,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}

/// Timing settings, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSettings {
    /// Interval between heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a remote node is purged.
    pub expiry_ms: u64,
    /// Bounded wait of one I/O poll.
    pub poll_interval_ms: u64,
    /// Bounded wait for the I/O thread on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Timeout of a reliable delivery.
    pub delivery_timeout_ms: u64,
    /// Silence after which an accepted bridge connection is closed.
    pub bridge_idle_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            expiry_ms: DEFAULT_EXPIRY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            bridge_idle_ms: DEFAULT_BRIDGE_IDLE_MS,
        }
    }
}

/// Complete bus configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusConfig {
    /// Network settings.
    pub network: NetworkSettings,
    /// Timing settings.
    pub timing: TimingSettings,
    /// Initial ACL entries for the bridge, in evaluation order.
    pub acl: Vec<AclEntry>,
}

impl BusConfig {
    /// Build a configuration from `mbus.*` properties on top of the
    /// defaults. Keys outside the `mbus.` namespace are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            config.apply_property(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one property. Unknown keys are ignored.
    pub fn apply_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key.trim() {
            "mbus.addr" => self.network.address = Some(parse_value(key, value)?),
            "mbus.mask" => self.network.netmask = Some(parse_value(key, value)?),
            "mbus.port" => self.network.port = parse_value(key, value)?,
            "mbus.bridge.port" => self.network.bridge_port = parse_value(key, value)?,
            "mbus.recv.buffer" => self.network.recv_buffer_bytes = parse_value(key, value)?,
            "mbus.heartbeat.ms" => self.timing.heartbeat_interval_ms = parse_value(key, value)?,
            "mbus.expiry.ms" => self.timing.expiry_ms = parse_value(key, value)?,
            "mbus.poll.ms" => self.timing.poll_interval_ms = parse_value(key, value)?,
            "mbus.shutdown.ms" => self.timing.shutdown_timeout_ms = parse_value(key, value)?,
            "mbus.delivery.ms" => self.timing.delivery_timeout_ms = parse_value(key, value)?,
            "mbus.bridge.idle.ms" => self.timing.bridge_idle_ms = parse_value(key, value)?,
            "mbus.acl" => self.acl = parse_acl_list(key, value)?,
            other => debug!(key = other, "[mbus] Ignoring unknown property"),
        }
        Ok(())
    }

    /// Apply `MBUS_ADDR`, `MBUS_MASK`, `MBUS_PORT` and `MBUS_BRIDGE_PORT`
    /// from the process environment. Unparseable values are logged and
    /// skipped.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok());
        self
    }

    /// Apply environment-style overrides from any lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: [(&str, &str); 4] = [
            ("MBUS_ADDR", "mbus.addr"),
            ("MBUS_MASK", "mbus.mask"),
            ("MBUS_PORT", "mbus.port"),
            ("MBUS_BRIDGE_PORT", "mbus.bridge.port"),
        ];

        for (var, key) in OVERRIDES {
            let Some(value) = lookup(var) else {
                continue;
            };
            match self.apply_property(key, &value) {
                Ok(()) => info!(var, value = %value, "[mbus] Config override from environment"),
                Err(e) => warn!(var, error = %e, "[mbus] Ignoring invalid environment override"),
            }
        }
    }

    /// Check timing values for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat interval must be positive".into()));
        }
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if t.expiry_ms < t.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "expiry ({} ms) is shorter than the heartbeat interval ({} ms)",
                t.expiry_ms, t.heartbeat_interval_ms
            )));
        }
        if t.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid("delivery timeout must be positive".into()));
        }
        if t.bridge_idle_ms == 0 {
            return Err(ConfigError::Invalid("bridge idle timeout must be positive".into()));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_acl_list(key: &str, value: &str) -> Result<Vec<AclEntry>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| parse_value(key, entry))
        .collect()
}

// =============================================================================
// TomlConfigProvider - Config file loading
// =============================================================================

/// Configuration file structure.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    mbus: MbusSection,
    #[serde(default)]
    acl: Vec<AclRule>,
}

#[derive(Debug, Deserialize, Default)]
struct MbusSection {
    addr: Option<String>,
    mask: Option<String>,
    port: Option<u16>,
    bridge_port: Option<u16>,
    recv_buffer_bytes: Option<usize>,
    heartbeat_ms: Option<u64>,
    expiry_ms: Option<u64>,
    poll_ms: Option<u64>,
    shutdown_ms: Option<u64>,
    delivery_ms: Option<u64>,
    bridge_idle_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AclRule {
    network: String,
    #[serde(default)]
    allow: bool,
}

/// Loads a [`BusConfig`] from a TOML file.
///
/// ```toml
/// [mbus]
/// addr = "192.168.1.10"
/// mask = "255.255.255.0"
/// port = 7943
/// heartbeat_ms = 10000
///
/// [[acl]]
/// network = "192.168.1.0/24"
/// allow = true
/// ```
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: BusConfig,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = BusConfig::default();
        let m = file.mbus;
        if let Some(addr) = &m.addr {
            config.network.address = Some(parse_value("mbus.addr", addr)?);
        }
        if let Some(mask) = &m.mask {
            config.network.netmask = Some(parse_value("mbus.mask", mask)?);
        }
        config.network.port = m.port.unwrap_or(config.network.port);
        config.network.bridge_port = m.bridge_port.unwrap_or(config.network.bridge_port);
        config.network.recv_buffer_bytes = m.recv_buffer_bytes.unwrap_or(config.network.recv_buffer_bytes);

        let t = &mut config.timing;
        t.heartbeat_interval_ms = m.heartbeat_ms.unwrap_or(t.heartbeat_interval_ms);
        t.expiry_ms = m.expiry_ms.unwrap_or(t.expiry_ms);
        t.poll_interval_ms = m.poll_ms.unwrap_or(t.poll_interval_ms);
        t.shutdown_timeout_ms = m.shutdown_ms.unwrap_or(t.shutdown_timeout_ms);
        t.delivery_timeout_ms = m.delivery_ms.unwrap_or(t.delivery_timeout_ms);
        t.bridge_idle_ms = m.bridge_idle_ms.unwrap_or(t.bridge_idle_ms);

        for rule in &file.acl {
            config.acl.push(AclEntry {
                network: parse_value("acl.network", &rule.network)?,
                allow: rule.allow,
            });
        }

        config.validate()?;
        Ok(Self { config })
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Take the loaded configuration.
    #[must_use]
    pub fn into_config(self) -> BusConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.network.port, 7943);
        assert_eq!(config.network.bridge_port, 0);
        assert_eq!(config.timing.heartbeat_interval_ms, 10_000);
        assert_eq!(config.timing.expiry_ms, 60_000);
        assert_eq!(config.timing.poll_interval_ms, 1_000);
        assert!(config.acl.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_properties() {
        let config = BusConfig::from_properties([
            ("mbus.addr", "192.168.1.10"),
            ("mbus.mask", "255.255.255.0"),
            ("mbus.port", "8000"),
            ("mbus.bridge.port", "8001"),
            ("mbus.heartbeat.ms", "500"),
            ("mbus.expiry.ms", "3000"),
            ("mbus.bridge.idle.ms", "250"),
            ("mbus.acl", "allow:10.0.0.0/8, deny:0.0.0.0/0"),
            ("unrelated.key", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.network.address, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(config.network.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(config.network.port, 8000);
        assert_eq!(config.network.bridge_port, 8001);
        assert_eq!(config.timing.heartbeat_interval_ms, 500);
        assert_eq!(config.timing.expiry_ms, 3_000);
        assert_eq!(config.timing.bridge_idle_ms, 250);
        assert_eq!(config.acl.len(), 2);
        assert!(config.acl[0].allow);
        assert!(!config.acl[1].allow);
    }

    #[test]
    fn test_invalid_property_value() {
        let err = BusConfig::from_properties([("mbus.port", "not-a-port")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "mbus.port"));

        let err = BusConfig::from_properties([("mbus.acl", "maybe:10.0.0.0/8")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validation() {
        let err = BusConfig::from_properties([("mbus.heartbeat.ms", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = BusConfig::from_properties([("mbus.expiry.ms", "10")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = BusConfig::from_properties([("mbus.bridge.idle.ms", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_style_overrides() {
        let env: HashMap<&str, &str> = [
            ("MBUS_ADDR", "10.1.2.3"),
            ("MBUS_PORT", "9999"),
            ("MBUS_BRIDGE_PORT", "nope"),
        ]
        .into_iter()
        .collect();

        let mut config = BusConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.network.address, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(config.network.port, 9999);
        // invalid override is skipped
        assert_eq!(config.network.bridge_port, 0);
        assert_eq!(config.network.netmask, None);
    }

    #[test]
    fn test_toml_parse() {
        let provider = TomlConfigProvider::parse(
            r#"
            [mbus]
            addr = "127.0.0.1"
            mask = "255.0.0.0"
            port = 7000
            heartbeat_ms = 1000
            expiry_ms = 5000

            [[acl]]
            network = "127.0.0.0/8"
            allow = true

            [[acl]]
            network = "0.0.0.0/0"
            "#,
        )
        .unwrap();

        let config = provider.config();
        assert_eq!(config.network.address, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.timing.expiry_ms, 5_000);
        assert_eq!(config.timing.poll_interval_ms, 1_000);
        assert_eq!(config.acl.len(), 2);
        assert!(config.acl[0].allow);
        assert!(!config.acl[1].allow);
    }

    #[test]
    fn test_toml_empty_is_default() {
        let config = TomlConfigProvider::parse("").unwrap().into_config();
        assert_eq!(config, BusConfig::default());
    }

    #[test]
    fn test_toml_errors() {
        assert!(matches!(
            TomlConfigProvider::parse("[mbus\nport = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TomlConfigProvider::parse("[mbus]\naddr = \"nowhere\""),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            TomlConfigProvider::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_toml_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mbus]\nport = 7100\nbridge_port = 7101").unwrap();

        let config = TomlConfigProvider::load(file.path()).unwrap().into_config();
        assert_eq!(config.network.port, 7100);
        assert_eq!(config.network.bridge_port, 7101);
    }
}
