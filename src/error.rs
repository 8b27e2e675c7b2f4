//! # Error Types
//!
//! Custom error types for MAV Proxy using `thiserror`.
//!
//! Only [`ProxyError::Config`] is fatal, and only before the event loop
//! starts. Everything raised while a message is being dispatched is
//! reported and the loop carries on.

use thiserror::Error;

/// Main error type for MAV Proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O failure on a link transport
    #[error("Transport error on {endpoint}: {reason}")]
    Transport {
        /// Endpoint string the link was opened with
        endpoint: String,
        /// What went wrong
        reason: String,
    },

    /// Malformed MAVLink frame
    #[error("MAVLink protocol error: {0}")]
    Protocol(String),

    /// Failure raised by a module hook
    #[error("Module {module} failed: {reason}")]
    Module {
        /// Name the module is registered under
        module: String,
        /// What went wrong
        reason: String,
    },

    /// Unknown or malformed interactive command
    #[error("{0}")]
    Command(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value rejected during validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Builds a transport error for `endpoint`
    pub fn transport(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Builds a module error for `module`
    pub fn module(module: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Module {
            module: module.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidConfig(_))
    }
}

/// Result type alias for MAV Proxy
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(ProxyError::InvalidConfig("no master".into()).is_fatal());
        assert!(!ProxyError::transport("udp:0.0.0.0:14550", "refused").is_fatal());
        assert!(!ProxyError::Protocol("bad crc".into()).is_fatal());
        assert!(!ProxyError::module("wp", "boom").is_fatal());
        assert!(!ProxyError::Command("Unknown command 'foo'".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ProxyError::transport("/dev/ttyUSB0", "permission denied");
        assert_eq!(
            err.to_string(),
            "Transport error on /dev/ttyUSB0: permission denied"
        );

        let err = ProxyError::module("wp", "index out of range");
        assert_eq!(err.to_string(), "Module wp failed: index out of range");
    }
}
