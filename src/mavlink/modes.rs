//! # Flight Mode Tables
//!
//! ArduPilot custom-mode numbers per vehicle class, used both to name the
//! mode reported in HEARTBEAT and to resolve `mode NAME` commands.

/// Vehicle family that decides which mode table applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleClass {
    Copter,
    Plane,
    Rover,
    Sub,
    Unknown,
}

impl VehicleClass {
    /// Classify a HEARTBEAT `type` (MAV_TYPE) value
    pub fn from_mav_type(mav_type: u8) -> Self {
        match mav_type {
            // QUADROTOR, COAXIAL, HELICOPTER, HEXAROTOR, OCTOROTOR, TRICOPTER, DODECAROTOR
            2 | 3 | 4 | 13 | 14 | 15 | 29 => Self::Copter,
            // FIXED_WING and the VTOL variants
            1 | 19 | 20 | 21 | 22 | 23 | 24 | 25 => Self::Plane,
            // GROUND_ROVER, SURFACE_BOAT
            10 | 11 => Self::Rover,
            // SUBMARINE
            12 => Self::Sub,
            _ => Self::Unknown,
        }
    }

    fn table(self) -> &'static [(u32, &'static str)] {
        match self {
            Self::Copter => COPTER_MODES,
            Self::Plane => PLANE_MODES,
            Self::Rover => ROVER_MODES,
            Self::Sub => SUB_MODES,
            Self::Unknown => &[],
        }
    }
}

const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (21, "SMART_RTL"),
];

const PLANE_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (15, "GUIDED"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
];

const ROVER_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "ACRO"),
    (3, "STEERING"),
    (4, "HOLD"),
    (5, "LOITER"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "SMART_RTL"),
    (15, "GUIDED"),
];

const SUB_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (7, "CIRCLE"),
    (9, "SURFACE"),
    (16, "POSHOLD"),
    (19, "MANUAL"),
];

/// Name of `custom_mode` for `class`, or `Mode(N)` when not in the table
///
/// # Examples
///
/// ```
/// use mav_proxy::mavlink::modes::{mode_name, VehicleClass};
///
/// assert_eq!(mode_name(VehicleClass::Copter, 4), "GUIDED");
/// assert_eq!(mode_name(VehicleClass::Copter, 99), "Mode(99)");
/// ```
pub fn mode_name(class: VehicleClass, custom_mode: u32) -> String {
    class
        .table()
        .iter()
        .find(|(num, _)| *num == custom_mode)
        .map_or_else(|| format!("Mode({})", custom_mode), |(_, name)| name.to_string())
}

/// Custom-mode number for a (case-insensitive) mode name
pub fn mode_number(class: VehicleClass, name: &str) -> Option<u32> {
    class
        .table()
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(num, _)| *num)
}

/// All mode names available for `class`
pub fn mode_names(class: VehicleClass) -> Vec<&'static str> {
    class.table().iter().map(|(_, name)| *name).collect()
}
