//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Command-line flags are applied on top afterwards.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{ProxyError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Master and output link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Endpoints connected to the autopilot
    #[serde(default)]
    pub masters: Vec<String>,

    /// Endpoints receiving a forwarded copy of the stream
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Baud rate for serial endpoints that do not name one
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Hardware flow control on serial endpoints
    #[serde(default)]
    pub rtscts: bool,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// 1-based master used for commands while it is healthy
    #[serde(default = "default_primary_link")]
    pub primary: usize,

    /// Flag lagging links and hold back their duplicate telemetry
    #[serde(default = "default_check_delay")]
    pub check_delay: bool,

    /// MAVLink version for frames we originate: 1, 2, or 0 to match the
    /// vehicle
    #[serde(default)]
    pub mavlink_version: u8,

    /// Message set spoken on the links
    #[serde(default = "default_dialect")]
    pub dialect: String,
}

/// Log file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_logfile")]
    pub logfile: String,

    /// Append to existing logs instead of truncating them
    #[serde(default)]
    pub append: bool,

    /// Aircraft directory for per-flight log sessions
    #[serde(default)]
    pub aircraft: Option<String>,

    /// Flush after every write
    #[serde(default)]
    pub flush: bool,
}

/// Heartbeat configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    /// Heartbeats per second sent to each master (0 disables)
    #[serde(default = "default_heartbeat_rate_hz")]
    pub rate_hz: u32,

    #[serde(default = "default_source_system")]
    pub source_system: u8,

    #[serde(default)]
    pub source_component: u8,
}

/// Telemetry stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Rate requested from the vehicle on the primary link (-1 leaves it alone)
    #[serde(default = "default_stream_rate")]
    pub rate: i32,

    /// Rate requested on the other masters
    #[serde(default = "default_stream_rate")]
    pub rate2: i32,

    /// Forward messages from outputs to the vehicle
    #[serde(default = "default_forward")]
    pub forward: bool,

    /// Forward stream-rate requests between consumers and the vehicle
    #[serde(default)]
    pub forward_rate: bool,

    /// Vehicle system id (0 discovers it from the first heartbeat)
    #[serde(default)]
    pub target_system: u8,

    #[serde(default)]
    pub target_component: u8,
}

/// Module configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModulesConfig {
    /// Modules loaded at startup
    #[serde(default = "default_modules")]
    pub load: Vec<String>,

    /// Error detail level for module failures (0-3)
    #[serde(default)]
    pub debug: u8,
}

/// Operator console configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Print bad-data records
    #[serde(default)]
    pub show_errors: bool,

    /// Ignore Ctrl-C; only `exit` stops the proxy
    #[serde(default)]
    pub require_exit: bool,

    #[serde(default = "default_history_lines")]
    pub history_lines: usize,

    /// Battery percentage that triggers a warning (0 disables)
    #[serde(default)]
    pub battery_warning: u8,

    /// Altitude announcement step in metres (0 disables)
    #[serde(default = "default_altitude_readout")]
    pub altitude_readout: u32,
}

// Default value functions
fn default_baud_rate() -> u32 { 57600 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_primary_link() -> usize { 1 }
fn default_check_delay() -> bool { true }
fn default_dialect() -> String { "ardupilotmega".to_string() }

fn default_logfile() -> String { "mav.tlog".to_string() }

fn default_heartbeat_rate_hz() -> u32 { 1 }
fn default_source_system() -> u8 { 255 }

fn default_stream_rate() -> i32 { 4 }
fn default_forward() -> bool { true }

fn default_modules() -> Vec<String> { vec!["mode".to_string(), "wp".to_string()] }

fn default_history_lines() -> usize { 100 }
fn default_altitude_readout() -> u32 { 10 }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            masters: Vec::new(),
            outputs: Vec::new(),
            baud_rate: default_baud_rate(),
            rtscts: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            primary: default_primary_link(),
            check_delay: default_check_delay(),
            mavlink_version: 0,
            dialect: default_dialect(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            logfile: default_logfile(),
            append: false,
            aircraft: None,
            flush: false,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_heartbeat_rate_hz(),
            source_system: default_source_system(),
            source_component: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate: default_stream_rate(),
            rate2: default_stream_rate(),
            forward: default_forward(),
            forward_rate: false,
            target_system: 0,
            target_component: 0,
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            load: default_modules(),
            debug: 0,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            show_errors: false,
            require_exit: false,
            history_lines: default_history_lines(),
            battery_warning: 0,
            altitude_readout: default_altitude_readout(),
        }
    }
}

/// Baud rates accepted for serial masters
const VALID_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 111100, 115200, 230400, 256000, 460800, 500000, 921600, 1500000,
];

/// Dialects whose CRC_EXTRA table is built in
const SUPPORTED_DIALECTS: &[&str] = &["ardupilotmega"];

fn invalid(message: impl Into<String>) -> ProxyError {
    ProxyError::InvalidConfig(message.into())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mav_proxy::config::Config;
    ///
    /// let config = Config::load("mavproxy.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if !VALID_BAUD_RATES.contains(&self.link.baud_rate) {
            return Err(invalid(format!("unsupported baud_rate {}", self.link.baud_rate)));
        }

        if self.link.reconnect_interval_ms == 0 || self.link.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.link.mavlink_version > 2 {
            return Err(invalid("mavlink_version must be 0 (auto), 1 or 2"));
        }

        if !SUPPORTED_DIALECTS.contains(&self.link.dialect.as_str()) {
            return Err(invalid(format!("unsupported dialect '{}'", self.link.dialect)));
        }

        if self.link.primary == 0 {
            return Err(invalid("primary link numbers start at 1"));
        }

        if self.log.logfile.is_empty() {
            return Err(invalid("logfile cannot be empty"));
        }

        if self.heartbeat.rate_hz > 50 {
            return Err(invalid("heartbeat rate_hz must be between 0 and 50"));
        }

        for (name, rate) in [("rate", self.stream.rate), ("rate2", self.stream.rate2)] {
            if !(-1..=100).contains(&rate) {
                return Err(invalid(format!("stream {} must be between -1 and 100", name)));
            }
        }

        if self.modules.debug > 3 {
            return Err(invalid("modules debug must be between 0 and 3"));
        }

        if self.console.history_lines == 0 || self.console.history_lines > 10000 {
            return Err(invalid("history_lines must be between 1 and 10000"));
        }

        if self.console.battery_warning > 100 {
            return Err(invalid("battery_warning is a percentage (0-100)"));
        }

        Ok(())
    }

    /// Check that there is at least one master to talk to
    ///
    /// Run after command-line flags have been merged in.
    pub fn require_master(&self) -> Result<()> {
        if self.link.masters.is_empty() {
            return Err(invalid("no master link configured (use --master)"));
        }
        if self.link.primary == 0 {
            return Err(invalid("primary link numbers start at 1"));
        }
        if self.link.primary > self.link.masters.len() {
            return Err(invalid(format!(
                "primary link {} but only {} master(s)",
                self.link.primary,
                self.link.masters.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link.baud_rate, 57600);
        assert_eq!(config.heartbeat.source_system, 255);
        assert_eq!(config.stream.rate, 4);
        assert!(config.stream.forward);
        assert!(!config.stream.forward_rate);
        assert_eq!(config.modules.load, vec!["mode", "wp"]);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.log.logfile, "mav.tlog");
        assert!(config.link.masters.is_empty());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[link]
masters = ["/dev/ttyUSB0,115200", "udp:0.0.0.0:14550"]
outputs = ["udpout:127.0.0.1:14551"]

[log]
aircraft = "Skyhunter"

[stream]
rate = 10
target_system = 1

[console]
battery_warning = 25
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.link.masters.len(), 2);
        assert_eq!(config.log.aircraft.as_deref(), Some("Skyhunter"));
        assert_eq!(config.stream.rate, 10);
        assert_eq!(config.stream.rate2, 4);
        assert_eq!(config.console.battery_warning, 25);
        assert!(config.require_master().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = Config::from_toml("[link\nmasters = 3");
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.link.baud_rate = 12345;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_zero() {
        let mut config = Config::default();
        config.link.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_rate_range() {
        let mut config = Config::default();
        config.stream.rate = -1;
        assert!(config.validate().is_ok());
        config.stream.rate = -2;
        assert!(config.validate().is_err());
        config.stream.rate = 4;
        config.stream.rate2 = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_rate_too_high() {
        let mut config = Config::default();
        config.heartbeat.rate_hz = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_battery_warning_is_percentage() {
        let mut config = Config::default();
        config.console.battery_warning = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mavlink_version_and_dialect() {
        let mut config = Config::default();
        assert_eq!(config.link.mavlink_version, 0);
        config.link.mavlink_version = 2;
        assert!(config.validate().is_ok());
        config.link.mavlink_version = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.link.dialect = "common".to_string();
        assert!(matches!(config.validate(), Err(ProxyError::InvalidConfig(_))));
    }

    #[test]
    fn test_history_lines_zero() {
        let mut config = Config::default();
        config.console.history_lines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_master() {
        let mut config = Config::default();
        assert!(matches!(config.require_master(), Err(ProxyError::InvalidConfig(_))));

        config.link.masters.push("udp:0.0.0.0:14550".to_string());
        assert!(config.require_master().is_ok());

        config.link.primary = 2;
        assert!(config.require_master().is_err());

        config.link.primary = 0;
        assert!(matches!(config.require_master(), Err(ProxyError::InvalidConfig(_))));
    }
}
