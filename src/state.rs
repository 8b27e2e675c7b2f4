//! # Vehicle State
//!
//! The proxy's picture of the vehicle, built from the master links.
//!
//! Every field that drives an announcement is a latch: it is compared with
//! the incoming value and an event is produced only when the value changes,
//! so the operator hears each transition once no matter how often the
//! vehicle repeats itself.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::mavlink::message::{GpsRaw, Heartbeat, SysStatus, VfrHud};
use crate::mavlink::modes::{mode_name, VehicleClass};
use crate::mavlink::protocol::{GPS_FIX_TYPE_3D, MAV_TYPE_GCS};
use crate::mavlink::{Frame, MavMessage};

/// A state transition worth telling the operator about
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// First heartbeat from a vehicle when the target was not configured
    TargetDiscovered { system: u8, component: u8 },
    ModeChanged(String),
    Armed,
    Disarmed,
    GpsLocked,
    GpsLost,
    BatteryLow(i8),
    /// Altitude moved into a new readout band (metres)
    Height(i64),
    /// Every master has gone quiet
    NoLink,
    /// Heartbeats resumed after [`StateEvent::NoLink`]
    HeartbeatRestored,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetDiscovered { system, .. } => write!(f, "online system {}", system),
            Self::ModeChanged(mode) => f.write_str(mode),
            Self::Armed => f.write_str("ARMED"),
            Self::Disarmed => f.write_str("DISARMED"),
            Self::GpsLocked => f.write_str("GPS OK"),
            Self::GpsLost => f.write_str("GPS fix lost"),
            Self::BatteryLow(pct) => write!(f, "Battery low {}%", pct),
            Self::Height(m) => write!(f, "height {}", m),
            Self::NoLink => f.write_str("no link"),
            Self::HeartbeatRestored => f.write_str("heartbeat OK"),
        }
    }
}

/// Thresholds for the threshold-based announcements
#[derive(Debug, Clone, Copy, Default)]
pub struct Thresholds {
    /// Battery percentage that triggers a warning (0 disables)
    pub battery_warning: i64,
    /// Altitude band size in metres (0 disables)
    pub altitude_readout: i64,
}

/// Most recent message of one type
#[derive(Debug, Clone)]
pub struct LastSeen {
    pub frame: Frame,
    pub count: u64,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    configured_system: u8,
    configured_component: u8,
    target_system: u8,
    target_component: u8,
    vehicle_class: VehicleClass,
    flight_mode: Option<String>,
    armed: bool,
    gps_locked: Option<bool>,
    battery_remaining: Option<i8>,
    battery_warned: bool,
    altitude: Option<f32>,
    altitude_band: Option<i64>,
    heartbeat_seen: bool,
    no_link: bool,
    messages: HashMap<u32, LastSeen>,
}

impl VehicleState {
    /// State targeting `system`/`component`; a system of 0 is discovered
    /// from the first vehicle heartbeat
    pub fn new(system: u8, component: u8) -> Self {
        Self {
            configured_system: system,
            configured_component: component,
            target_system: system,
            target_component: component,
            vehicle_class: VehicleClass::Unknown,
            flight_mode: None,
            armed: false,
            gps_locked: None,
            battery_remaining: None,
            battery_warned: false,
            altitude: None,
            altitude_band: None,
            heartbeat_seen: false,
            no_link: false,
            messages: HashMap::new(),
        }
    }

    pub fn target_system(&self) -> u8 {
        self.target_system
    }

    pub fn target_component(&self) -> u8 {
        self.target_component
    }

    pub fn vehicle_class(&self) -> VehicleClass {
        self.vehicle_class
    }

    pub fn flight_mode(&self) -> Option<&str> {
        self.flight_mode.as_deref()
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn gps_locked(&self) -> Option<bool> {
        self.gps_locked
    }

    pub fn battery_remaining(&self) -> Option<i8> {
        self.battery_remaining
    }

    pub fn altitude(&self) -> Option<f32> {
        self.altitude
    }

    /// True once any vehicle heartbeat has arrived
    pub fn heartbeat_seen(&self) -> bool {
        self.heartbeat_seen
    }

    pub fn last_message(&self, message_id: u32) -> Option<&LastSeen> {
        self.messages.get(&message_id)
    }

    /// Every message type seen, with its most recent instance
    pub fn messages(&self) -> impl Iterator<Item = (&u32, &LastSeen)> {
        self.messages.iter()
    }

    /// Change the target; 0 returns to discovery
    pub fn set_target(&mut self, system: u8, component: u8) {
        self.configured_system = system;
        self.configured_component = component;
        self.target_system = system;
        self.target_component = component;
    }

    /// Forget everything learned from the vehicle
    pub fn reset(&mut self) {
        *self = Self::new(self.configured_system, self.configured_component);
    }

    /// Remember `frame` as the latest of its type
    pub fn record(&mut self, frame: &Frame, now: Instant) {
        self.messages
            .entry(frame.message_id)
            .and_modify(|seen| {
                seen.frame = frame.clone();
                seen.count += 1;
                seen.at = now;
            })
            .or_insert_with(|| LastSeen {
                frame: frame.clone(),
                count: 1,
                at: now,
            });
    }

    /// Apply one decoded message from a master link
    ///
    /// Messages from systems other than the target are ignored, apart from
    /// the heartbeat that first identifies the target.
    pub fn apply(&mut self, frame: &Frame, msg: &MavMessage, thresholds: Thresholds) -> Vec<StateEvent> {
        let mut events = Vec::new();

        if let MavMessage::Heartbeat(hb) = msg {
            if hb.mav_type == MAV_TYPE_GCS {
                return events;
            }
            if self.target_system == 0 {
                self.target_system = frame.system_id;
                if self.configured_component == 0 {
                    self.target_component = frame.component_id;
                }
                events.push(StateEvent::TargetDiscovered {
                    system: self.target_system,
                    component: self.target_component,
                });
            }
        }

        if frame.system_id != self.target_system {
            return events;
        }

        match msg {
            // Gimbals, cameras and the like share the system id
            MavMessage::Heartbeat(_)
                if self.target_component != 0 && frame.component_id != self.target_component => {}
            MavMessage::Heartbeat(hb) => self.apply_heartbeat(hb, &mut events),
            // A second receiver never moves the lock latch
            MavMessage::GpsRaw(gps) => self.apply_gps(gps, &mut events),
            MavMessage::SysStatus(status) => self.apply_sys_status(status, thresholds, &mut events),
            MavMessage::VfrHud(hud) => self.apply_vfr_hud(hud, thresholds, &mut events),
            _ => {}
        }
        events
    }

    fn apply_heartbeat(&mut self, hb: &Heartbeat, events: &mut Vec<StateEvent>) {
        self.heartbeat_seen = true;
        self.vehicle_class = VehicleClass::from_mav_type(hb.mav_type);

        let mode = mode_name(self.vehicle_class, hb.custom_mode);
        if self.flight_mode.as_deref() != Some(mode.as_str()) {
            self.flight_mode = Some(mode.clone());
            events.push(StateEvent::ModeChanged(mode));
        }

        let armed = hb.armed();
        if armed != self.armed {
            self.armed = armed;
            events.push(if armed { StateEvent::Armed } else { StateEvent::Disarmed });
        }
    }

    fn apply_gps(&mut self, gps: &GpsRaw, events: &mut Vec<StateEvent>) {
        let locked = gps.fix_type >= GPS_FIX_TYPE_3D;
        match self.gps_locked {
            Some(previous) if previous == locked => {}
            Some(_) => events.push(if locked { StateEvent::GpsLocked } else { StateEvent::GpsLost }),
            None => {}
        }
        self.gps_locked = Some(locked);
    }

    fn apply_sys_status(&mut self, status: &SysStatus, thresholds: Thresholds, events: &mut Vec<StateEvent>) {
        let remaining = status.battery_remaining;
        if remaining < 0 {
            return;
        }
        self.battery_remaining = Some(remaining);

        if thresholds.battery_warning <= 0 {
            self.battery_warned = false;
            return;
        }
        let low = (remaining as i64) < thresholds.battery_warning;
        if low && !self.battery_warned {
            events.push(StateEvent::BatteryLow(remaining));
        }
        self.battery_warned = low;
    }

    fn apply_vfr_hud(&mut self, hud: &VfrHud, thresholds: Thresholds, events: &mut Vec<StateEvent>) {
        self.altitude = Some(hud.alt);
        if thresholds.altitude_readout <= 0 || !hud.alt.is_finite() {
            return;
        }
        let step = thresholds.altitude_readout;
        let band = (hud.alt as f64 / step as f64).floor() as i64;
        if let Some(previous) = self.altitude_band {
            if previous != band {
                events.push(StateEvent::Height(band * step));
            }
        }
        self.altitude_band = Some(band);
    }

    /// A liveness message arrived on a master
    pub fn note_master_alive(&mut self) -> Option<StateEvent> {
        if self.no_link {
            self.no_link = false;
            return Some(StateEvent::HeartbeatRestored);
        }
        None
    }

    /// Every master has been silent past the link timeout
    pub fn note_all_silent(&mut self) -> Option<StateEvent> {
        if !self.no_link {
            self.no_link = true;
            return Some(StateEvent::NoLink);
        }
        None
    }
}
