//! # Endpoint Strings
//!
//! Parses the device strings accepted by `--master`, `--out` and `--sitl`.
//!
//! | Form                   | Meaning                                    |
//! |------------------------|--------------------------------------------|
//! | `/dev/ttyUSB0[,BAUD]`  | serial device, default 57600 baud          |
//! | `udp:HOST:PORT`        | listen on HOST:PORT, reply to last sender  |
//! | `udpin:HOST:PORT`      | same as `udp:`                             |
//! | `udpout:HOST:PORT`     | send to HOST:PORT from an ephemeral port   |
//! | `udpbcast:HOST:PORT`   | broadcast to HOST:PORT                     |
//! | `tcp:HOST:PORT`        | connect to HOST:PORT                       |

use std::fmt;

use crate::error::{ProxyError, Result};

/// Baud rate used when a serial endpoint does not name one
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// A parsed transport address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Serial device
    Serial {
        /// Device path
        path: String,
        /// Baud rate
        baud: u32,
    },
    /// UDP socket bound locally; the peer is learned from incoming datagrams
    UdpIn(String),
    /// UDP socket sending to a fixed peer
    UdpOut(String),
    /// UDP socket sending to a broadcast address
    UdpBroadcast(String),
    /// TCP client connection
    Tcp(String),
}

impl Endpoint {
    /// Parse an endpoint string
    ///
    /// `default_baud` applies to serial devices without an explicit rate.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidConfig`] for empty strings, missing ports
    /// and unparsable baud rates.
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_proxy::link::endpoint::Endpoint;
    ///
    /// let ep = Endpoint::parse("udpout:127.0.0.1:14550", 57600).unwrap();
    /// assert_eq!(ep, Endpoint::UdpOut("127.0.0.1:14550".to_string()));
    ///
    /// let ep = Endpoint::parse("/dev/ttyACM0,115200", 57600).unwrap();
    /// assert_eq!(ep, Endpoint::Serial { path: "/dev/ttyACM0".to_string(), baud: 115200 });
    /// ```
    pub fn parse(spec: &str, default_baud: u32) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ProxyError::InvalidConfig("empty endpoint".to_string()));
        }

        if let Some((scheme, addr)) = spec.split_once(':') {
            let network = match scheme {
                "udp" | "udpin" => Some(Self::UdpIn as fn(String) -> Self),
                "udpout" => Some(Self::UdpOut as fn(String) -> Self),
                "udpbcast" => Some(Self::UdpBroadcast as fn(String) -> Self),
                "tcp" => Some(Self::Tcp as fn(String) -> Self),
                _ => None,
            };
            if let Some(make) = network {
                return Ok(make(Self::parse_host_port(spec, addr)?));
            }
        }

        let (path, baud) = match spec.rsplit_once(',') {
            Some((path, baud)) => {
                let baud = baud.trim().parse::<u32>().map_err(|_| {
                    ProxyError::InvalidConfig(format!("invalid baud rate in '{}'", spec))
                })?;
                (path.trim(), baud)
            }
            None => (spec, default_baud),
        };

        if path.is_empty() || baud == 0 {
            return Err(ProxyError::InvalidConfig(format!("invalid serial endpoint '{}'", spec)));
        }

        Ok(Self::Serial {
            path: path.to_string(),
            baud,
        })
    }

    fn parse_host_port(spec: &str, addr: &str) -> Result<String> {
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            ProxyError::InvalidConfig(format!("endpoint '{}' needs HOST:PORT", spec))
        })?;
        port.parse::<u16>().map_err(|_| {
            ProxyError::InvalidConfig(format!("invalid port in endpoint '{}'", spec))
        })?;
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok(format!("{}:{}", host, port))
    }

    /// True for transports that cannot be reopened without the device reappearing
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud } => write!(f, "{},{}", path, baud),
            Self::UdpIn(addr) => write!(f, "udp:{}", addr),
            Self::UdpOut(addr) => write!(f, "udpout:{}", addr),
            Self::UdpBroadcast(addr) => write!(f, "udpbcast:{}", addr),
            Self::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}
