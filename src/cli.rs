//! Command-line options
//!
//! Flags override the configuration file; anything not given on the
//! command line keeps the file's (or the default) value.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::proxy::StartupOptions;

#[derive(Parser, Debug, Default)]
#[command(name = "mav-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Vehicle link, e.g. /dev/ttyUSB0,57600 or udp:0.0.0.0:14550 (repeatable)
    #[arg(long = "master", value_name = "DEVICE")]
    pub masters: Vec<String>,

    /// Ground-station output, e.g. udpout:127.0.0.1:14550 (repeatable)
    #[arg(long = "out", value_name = "DEVICE")]
    pub outputs: Vec<String>,

    /// Simulator address, added as a UDP master
    #[arg(long, value_name = "HOST:PORT")]
    pub sitl: Option<String>,

    /// Stream rate requested from the vehicle (-1 leaves it alone)
    #[arg(long, allow_negative_numbers = true)]
    pub streamrate: Option<i32>,

    /// Our MAVLink system id
    #[arg(long)]
    pub source_system: Option<u8>,

    /// Our MAVLink component id
    #[arg(long)]
    pub source_component: Option<u8>,

    /// Vehicle system id (0 discovers it from the first heartbeat)
    #[arg(long)]
    pub target_system: Option<u8>,

    /// Vehicle component id
    #[arg(long)]
    pub target_component: Option<u8>,

    /// Telemetry log file when no aircraft is given
    #[arg(long)]
    pub logfile: Option<String>,

    /// Append to the log instead of truncating it
    #[arg(long)]
    pub append_log: bool,

    /// Aircraft directory; logs go to AIRCRAFT/logs/DATE/flightN
    #[arg(long)]
    pub aircraft: Option<String>,

    /// Modules to load at startup, comma separated (repeatable)
    #[arg(long = "load-module", value_delimiter = ',')]
    pub load_modules: Vec<String>,

    /// Commands to run at startup, `;` separated
    #[arg(long)]
    pub cmd: Option<String>,

    /// Keep logging into the latest flight directory
    #[arg(long = "continue")]
    pub continue_mode: bool,

    /// Speak MAVLink 1 only
    #[arg(long, conflicts_with = "mav20")]
    pub mav10: bool,

    /// Speak MAVLink 2 only
    #[arg(long)]
    pub mav20: bool,

    /// MAVLink dialect
    #[arg(long)]
    pub dialect: Option<String>,

    /// Default baud rate for serial masters
    #[arg(long)]
    pub baudrate: Option<u32>,

    /// Use hardware flow control on serial masters
    #[arg(long)]
    pub rtscts: bool,

    /// Don't wait for a heartbeat before running startup commands
    #[arg(long)]
    pub nowait: bool,

    /// Show bad data on the console
    #[arg(long)]
    pub show_errors: bool,

    /// Configuration file
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write the diagnostic log to FILE
    #[arg(long, value_name = "FILE")]
    pub debug_log: Option<PathBuf>,
}

impl Cli {
    /// Overlay the flags onto `config`
    pub fn apply(&self, config: &mut Config) {
        let link = &mut config.link;
        if !self.masters.is_empty() {
            link.masters = self.masters.clone();
        }
        if let Some(sitl) = &self.sitl {
            link.masters.push(sitl_endpoint(sitl));
        }
        link.outputs.extend(self.outputs.iter().cloned());
        if let Some(baud) = self.baudrate {
            link.baud_rate = baud;
        }
        link.rtscts |= self.rtscts;
        if self.mav10 {
            link.mavlink_version = 1;
        } else if self.mav20 {
            link.mavlink_version = 2;
        }
        if let Some(dialect) = &self.dialect {
            link.dialect = dialect.clone();
        }

        if let Some(rate) = self.streamrate {
            config.stream.rate = rate;
        }
        if let Some(system) = self.target_system {
            config.stream.target_system = system;
        }
        if let Some(component) = self.target_component {
            config.stream.target_component = component;
        }
        if let Some(system) = self.source_system {
            config.heartbeat.source_system = system;
        }
        if let Some(component) = self.source_component {
            config.heartbeat.source_component = component;
        }

        if let Some(logfile) = &self.logfile {
            config.log.logfile = logfile.clone();
        }
        config.log.append |= self.append_log;
        if let Some(aircraft) = &self.aircraft {
            config.log.aircraft = Some(aircraft.clone());
        }

        for name in &self.load_modules {
            let name = name.trim();
            if !name.is_empty() && !config.modules.load.iter().any(|m| m == name) {
                config.modules.load.push(name.to_string());
            }
        }
        config.console.show_errors |= self.show_errors;
    }

    pub fn startup_options(&self) -> StartupOptions {
        StartupOptions {
            continue_mode: self.continue_mode,
            nowait: self.nowait,
            commands: self.cmd.iter().cloned().collect(),
            home_dir: None,
        }
    }
}

/// `--sitl` takes a bare address or a full endpoint
fn sitl_endpoint(sitl: &str) -> String {
    match sitl.split_once(':') {
        Some(("udp" | "udpin" | "udpout" | "udpbcast" | "tcp", _)) => sitl.to_string(),
        _ => format!("udpout:{}", sitl),
    }
}
