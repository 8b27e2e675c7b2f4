//! # Settings Registry
//!
//! Named, typed values the operator can change at runtime with
//! `set NAME VALUE`. Modules may add their own entries.

use std::fmt;

use crate::config::Config;
use crate::error::{ProxyError, Result};

/// A setting's current value
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", u8::from(*b)),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Accepted values for a setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingKind {
    Bool,
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Text,
}

impl SettingKind {
    fn parse(&self, name: &str, text: &str) -> Result<SettingValue> {
        let bad = || ProxyError::Command(format!("Invalid value '{}' for {}", text, name));
        match *self {
            Self::Bool => match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(SettingValue::Bool(true)),
                "0" | "false" | "no" | "off" => Ok(SettingValue::Bool(false)),
                _ => Err(bad()),
            },
            Self::Int { min, max } => {
                let value: i64 = text.parse().map_err(|_| bad())?;
                if value < min || value > max {
                    return Err(ProxyError::Command(format!(
                        "{} must be between {} and {}",
                        name, min, max
                    )));
                }
                Ok(SettingValue::Int(value))
            }
            Self::Float { min, max } => {
                let value: f64 = text.parse().map_err(|_| bad())?;
                if !(min..=max).contains(&value) {
                    return Err(ProxyError::Command(format!(
                        "{} must be between {} and {}",
                        name, min, max
                    )));
                }
                Ok(SettingValue::Float(value))
            }
            Self::Text => Ok(SettingValue::Text(text.to_string())),
        }
    }
}

/// One registered setting
#[derive(Debug, Clone)]
pub struct Setting {
    pub name: String,
    pub kind: SettingKind,
    pub value: SettingValue,
    pub help: String,
}

impl Setting {
    pub fn new(name: &str, kind: SettingKind, value: SettingValue, help: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value,
            help: help.to_string(),
        }
    }
}

pub const HEARTBEAT: &str = "heartbeat";
pub const STREAMRATE: &str = "streamrate";
pub const STREAMRATE2: &str = "streamrate2";
pub const MAVFWD: &str = "mavfwd";
pub const MAVFWD_RATE: &str = "mavfwd_rate";
pub const MODDEBUG: &str = "moddebug";
pub const SHOWNOISE: &str = "shownoise";
pub const REQUIREEXIT: &str = "requireexit";
pub const FLUSHLOGS: &str = "flushlogs";
pub const CHECKDELAY: &str = "checkdelay";
pub const LINK: &str = "link";
pub const BATTWARN: &str = "battwarn";
pub const ALTREADOUT: &str = "altreadout";
pub const TARGET_SYSTEM: &str = "target_system";
pub const TARGET_COMPONENT: &str = "target_component";
pub const SOURCE_SYSTEM: &str = "source_system";
pub const SOURCE_COMPONENT: &str = "source_component";

/// Ordered collection of settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    entries: Vec<Setting>,
}

impl Settings {
    /// Built-in settings seeded from `config`
    pub fn from_config(config: &Config) -> Self {
        use SettingKind::*;
        use SettingValue as V;

        let byte = Int { min: 0, max: 255 };
        let mut settings = Self::default();
        let builtins = [
            Setting::new(HEARTBEAT, Int { min: 0, max: 50 }, V::Int(config.heartbeat.rate_hz as i64), "heartbeat rate in Hz"),
            Setting::new(STREAMRATE, Int { min: -1, max: 100 }, V::Int(config.stream.rate as i64), "stream rate on the primary link"),
            Setting::new(STREAMRATE2, Int { min: -1, max: 100 }, V::Int(config.stream.rate2 as i64), "stream rate on other links"),
            Setting::new(MAVFWD, Bool, V::Bool(config.stream.forward), "forward messages from outputs to the vehicle"),
            Setting::new(MAVFWD_RATE, Bool, V::Bool(config.stream.forward_rate), "forward stream rate requests"),
            Setting::new(MODDEBUG, Int { min: 0, max: 3 }, V::Int(config.modules.debug as i64), "module error detail level"),
            Setting::new(SHOWNOISE, Bool, V::Bool(config.console.show_errors), "show bad data"),
            Setting::new(REQUIREEXIT, Bool, V::Bool(config.console.require_exit), "ignore Ctrl-C, require 'exit'"),
            Setting::new(FLUSHLOGS, Bool, V::Bool(config.log.flush), "flush logs on every write"),
            Setting::new(CHECKDELAY, Bool, V::Bool(config.link.check_delay), "hold back telemetry from lagging links"),
            Setting::new(LINK, Int { min: 1, max: 255 }, V::Int(config.link.primary as i64), "primary link number"),
            Setting::new(BATTWARN, Int { min: 0, max: 100 }, V::Int(config.console.battery_warning as i64), "battery warning level (percent)"),
            Setting::new(ALTREADOUT, Int { min: 0, max: 10000 }, V::Int(config.console.altitude_readout as i64), "altitude readout step (metres)"),
            Setting::new(TARGET_SYSTEM, byte, V::Int(config.stream.target_system as i64), "vehicle system id (0 = discover)"),
            Setting::new(TARGET_COMPONENT, byte, V::Int(config.stream.target_component as i64), "vehicle component id"),
            Setting::new(SOURCE_SYSTEM, byte, V::Int(config.heartbeat.source_system as i64), "our system id"),
            Setting::new(SOURCE_COMPONENT, byte, V::Int(config.heartbeat.source_component as i64), "our component id"),
        ];
        settings.entries.extend(builtins);
        settings
    }

    /// Register an additional setting; an existing entry of the same name
    /// is kept
    pub fn add(&mut self, setting: Setting) -> bool {
        if self.lookup(&setting.name).is_some() {
            return false;
        }
        self.entries.push(setting);
        true
    }

    /// Remove a setting added by a module
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|s| s.name != name);
    }

    pub fn lookup(&self, name: &str) -> Option<&Setting> {
        self.entries.iter().find(|s| s.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.lookup(name).map(|s| &s.value)
    }

    /// Boolean value, false when missing or not a flag
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(SettingValue::Bool(true)))
    }

    /// Integer value, 0 when missing or not an integer
    pub fn int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(SettingValue::Int(i)) => *i,
            _ => 0,
        }
    }

    /// Byte-sized integer value (ids)
    pub fn byte(&self, name: &str) -> u8 {
        self.int(name).clamp(0, 255) as u8
    }

    /// Parse and store `text` as the new value of `name`
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Command`] for unknown names and for values of
    /// the wrong type or out of range.
    pub fn set(&mut self, name: &str, text: &str) -> Result<&SettingValue> {
        let entry = self
            .entries
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ProxyError::Command(format!("Unknown setting '{}'", name)))?;
        entry.value = entry.kind.parse(name, text)?;
        Ok(&entry.value)
    }

    /// Store a value directly, bypassing text parsing
    pub(crate) fn store(&mut self, name: &str, value: SettingValue) {
        if let Some(entry) = self.entries.iter_mut().find(|s| s.name == name) {
            entry.value = value;
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::from_config(&Config::default())
    }

    #[test]
    fn test_defaults_from_config() {
        let s = settings();
        assert_eq!(s.int(HEARTBEAT), 1);
        assert_eq!(s.int(STREAMRATE), 4);
        assert!(s.flag(MAVFWD));
        assert!(!s.flag(MAVFWD_RATE));
        assert!(s.flag(CHECKDELAY));
        assert_eq!(s.byte(SOURCE_SYSTEM), 255);
        assert_eq!(s.int(LINK), 1);
    }

    #[test]
    fn test_set_parses_by_kind() {
        let mut s = settings();
        assert_eq!(s.set(MAVFWD_RATE, "1").unwrap(), &SettingValue::Bool(true));
        assert!(s.flag(MAVFWD_RATE));
        s.set(STREAMRATE, "10").unwrap();
        assert_eq!(s.int(STREAMRATE), 10);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut s = settings();
        assert!(matches!(s.set(STREAMRATE, "fast"), Err(ProxyError::Command(_))));
        assert!(s.set(STREAMRATE, "500").is_err());
        assert!(s.set(MAVFWD, "maybe").is_err());
        assert!(s.set("nosuch", "1").is_err());
        assert_eq!(s.int(STREAMRATE), 4);
    }

    #[test]
    fn test_module_settings() {
        let mut s = settings();
        let extra = Setting::new(
            "wpupdates",
            SettingKind::Float { min: 0.0, max: 10.0 },
            SettingValue::Float(1.0),
            "",
        );
        assert!(s.add(extra.clone()));
        assert!(!s.add(extra));
        s.set("wpupdates", "2.5").unwrap();
        assert_eq!(s.get("wpupdates"), Some(&SettingValue::Float(2.5)));

        s.remove("wpupdates");
        assert!(s.get("wpupdates").is_none());
    }

    #[test]
    fn test_display_bool_as_digit() {
        assert_eq!(SettingValue::Bool(true).to_string(), "1");
        assert_eq!(SettingValue::Text("x".into()).to_string(), "x");
    }
}
