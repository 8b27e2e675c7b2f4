//! # Decoded Messages
//!
//! Field-level views of the few message types the router reacts to,
//! taken from the ardupilotmega dialect decoder. Everything else stays an
//! opaque [`Frame`].

use mavlink::ardupilotmega;

use super::protocol::*;

/// HEARTBEAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// True when the safety-armed flag is set
    pub fn armed(&self) -> bool {
        self.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0
    }
}

/// SYS_STATUS (battery fields only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysStatus {
    /// Millivolts
    pub voltage_battery: u16,
    /// Centiamps, -1 when unknown
    pub current_battery: i16,
    /// Percent, -1 when unknown
    pub battery_remaining: i8,
}

/// GPS_RAW_INT and GPS2_RAW share the fields the proxy cares about
///
/// Only GPS_RAW_INT drives the lock announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsRaw {
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

/// GLOBAL_POSITION_INT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPositionInt {
    pub time_boot_ms: u32,
    pub lat: i32,
    pub lon: i32,
    /// Millimetres above MSL
    pub alt: i32,
    /// Millimetres above home
    pub relative_alt: i32,
}

/// VFR_HUD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfrHud {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub alt: f32,
    pub climb: f32,
    pub heading: i16,
    pub throttle: u16,
}

/// STATUSTEXT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub severity: u8,
    pub text: String,
}

/// REQUEST_DATA_STREAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDataStream {
    pub req_message_rate: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub req_stream_id: u8,
    pub start_stop: u8,
}

/// MISSION_CURRENT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionCurrent {
    pub seq: u16,
}

/// MISSION_COUNT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionCount {
    pub count: u16,
    pub target_system: u8,
    pub target_component: u8,
}

/// A frame decoded as far as the proxy needs
#[derive(Debug, Clone, PartialEq)]
pub enum MavMessage {
    Heartbeat(Heartbeat),
    SysStatus(SysStatus),
    /// GPS_RAW_INT, the primary receiver
    GpsRaw(GpsRaw),
    /// GPS2_RAW, a second receiver
    Gps2Raw(GpsRaw),
    GlobalPositionInt(GlobalPositionInt),
    VfrHud(VfrHud),
    StatusText(StatusText),
    RequestDataStream(RequestDataStream),
    MissionCurrent(MissionCurrent),
    MissionCount(MissionCount),
    /// Any other message type, known or not
    Other,
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl MavMessage {
    /// Decode the fields of `frame`
    ///
    /// Never fails: unknown types, and payloads the dialect rejects,
    /// decode to [`MavMessage::Other`].
    pub fn decode(frame: &Frame) -> Self {
        use ardupilotmega::MavMessage as M;

        let Some(msg) = frame.decode() else {
            return Self::Other;
        };

        match msg {
            M::HEARTBEAT(hb) => Self::Heartbeat(Heartbeat {
                custom_mode: hb.custom_mode,
                mav_type: hb.mavtype as u8,
                autopilot: hb.autopilot as u8,
                base_mode: hb.base_mode.bits(),
                system_status: hb.system_status as u8,
                mavlink_version: hb.mavlink_version,
            }),
            M::SYS_STATUS(status) => Self::SysStatus(SysStatus {
                voltage_battery: status.voltage_battery,
                current_battery: status.current_battery,
                battery_remaining: status.battery_remaining,
            }),
            M::GPS_RAW_INT(gps) => Self::GpsRaw(GpsRaw {
                lat: gps.lat,
                lon: gps.lon,
                alt: gps.alt,
                fix_type: gps.fix_type as u8,
                satellites_visible: gps.satellites_visible,
            }),
            M::GPS2_RAW(gps) => Self::Gps2Raw(GpsRaw {
                lat: gps.lat,
                lon: gps.lon,
                alt: gps.alt,
                fix_type: gps.fix_type as u8,
                satellites_visible: gps.satellites_visible,
            }),
            M::GLOBAL_POSITION_INT(pos) => Self::GlobalPositionInt(GlobalPositionInt {
                time_boot_ms: pos.time_boot_ms,
                lat: pos.lat,
                lon: pos.lon,
                alt: pos.alt,
                relative_alt: pos.relative_alt,
            }),
            M::VFR_HUD(hud) => Self::VfrHud(VfrHud {
                airspeed: hud.airspeed,
                groundspeed: hud.groundspeed,
                alt: hud.alt,
                climb: hud.climb,
                heading: hud.heading,
                throttle: hud.throttle,
            }),
            M::STATUSTEXT(text) => Self::StatusText(StatusText {
                severity: text.severity as u8,
                text: c_string(&text.text),
            }),
            M::REQUEST_DATA_STREAM(req) => Self::RequestDataStream(RequestDataStream {
                req_message_rate: req.req_message_rate,
                target_system: req.target_system,
                target_component: req.target_component,
                req_stream_id: req.req_stream_id,
                start_stop: req.start_stop,
            }),
            M::MISSION_CURRENT(current) => Self::MissionCurrent(MissionCurrent { seq: current.seq }),
            M::MISSION_COUNT(count) => Self::MissionCount(MissionCount {
                count: count.count,
                target_system: count.target_system,
                target_component: count.target_component,
            }),
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_frame, FrameHeader};
    use crate::mavlink::decoder::{FrameParser, ParseEvent};

    fn frame_for(version: MavVersion, id: u32, payload: &[u8]) -> Frame {
        let header = FrameHeader {
            version,
            seq: 0,
            system_id: 1,
            component_id: 1,
        };
        let raw = encode_frame(header, id, payload).unwrap();
        match FrameParser::new().push(&raw).remove(0) {
            ParseEvent::Frame(f) => f,
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeat() {
        let frame = frame_for(MavVersion::V1, MSG_ID_HEARTBEAT, &[5, 0, 0, 0, 2, 3, 0x81, 4, 3]);
        match MavMessage::decode(&frame) {
            MavMessage::Heartbeat(hb) => {
                assert_eq!(hb.custom_mode, 5);
                assert_eq!(hb.mav_type, 2);
                assert!(hb.armed());
            }
            other => panic!("Expected heartbeat, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_truncated_v2_gps() {
        let mut payload = vec![0u8; 30];
        payload[28] = 3; // fix_type
        payload[29] = 0; // satellites, trimmed on the wire
        let frame = frame_for(MavVersion::V2, MSG_ID_GPS_RAW_INT, &payload);
        assert!(frame.payload().len() < 30);

        match MavMessage::decode(&frame) {
            MavMessage::GpsRaw(gps) => {
                assert_eq!(gps.fix_type, 3);
                assert_eq!(gps.satellites_visible, 0);
            }
            other => panic!("Expected GPS, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_gps2_is_its_own_variant() {
        let mut payload = vec![0u8; 35];
        payload[32] = 1; // fix_type
        payload[33] = 7; // satellites
        let frame = frame_for(MavVersion::V1, MSG_ID_GPS2_RAW, &payload);

        match MavMessage::decode(&frame) {
            MavMessage::Gps2Raw(gps) => {
                assert_eq!(gps.fix_type, 1);
                assert_eq!(gps.satellites_visible, 7);
            }
            other => panic!("Expected GPS2, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unhandled_type_is_other() {
        let frame = frame_for(MavVersion::V1, 30, &[0u8; 28]);
        assert_eq!(MavMessage::decode(&frame), MavMessage::Other);
    }

    #[test]
    fn test_decode_vfr_hud_altitude() {
        let mut payload = vec![0u8; 20];
        payload[8..12].copy_from_slice(&123.5f32.to_le_bytes());
        let frame = frame_for(MavVersion::V1, MSG_ID_VFR_HUD, &payload);

        match MavMessage::decode(&frame) {
            MavMessage::VfrHud(hud) => assert!((hud.alt - 123.5).abs() < f32::EPSILON),
            other => panic!("Expected VFR_HUD, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_statustext() {
        let mut payload = vec![0u8; 51];
        payload[0] = 6;
        payload[1..10].copy_from_slice(b"PreArm OK");
        let frame = frame_for(MavVersion::V1, MSG_ID_STATUSTEXT, &payload);

        assert_eq!(
            MavMessage::decode(&frame),
            MavMessage::StatusText(StatusText {
                severity: 6,
                text: "PreArm OK".to_string()
            })
        );
    }

    #[test]
    fn test_time_boot_ms_extraction() {
        let mut payload = vec![0u8; 28];
        payload[0..4].copy_from_slice(&123_456u32.to_le_bytes());
        let frame = frame_for(MavVersion::V1, 30, &payload);
        assert_eq!(frame.name(), "ATTITUDE");
        assert_eq!(frame.time_boot_ms(), Some(123_456));

        let hb = frame_for(MavVersion::V1, MSG_ID_HEARTBEAT, &[0u8; 9]);
        assert_eq!(hb.time_boot_ms(), None);
    }
}
