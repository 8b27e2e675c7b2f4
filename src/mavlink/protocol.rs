//! # MAVLink Protocol Constants and Types
//!
//! Framing definitions shared by the decoder and encoder.

use bytes::Bytes;
use mavlink::{ardupilotmega, MavlinkVersion, Message};

/// MAVLink 1 start marker
pub const MAVLINK_V1_STX: u8 = 0xFE;

/// MAVLink 2 start marker
pub const MAVLINK_V2_STX: u8 = 0xFD;

/// Header size after (and including) the start marker, MAVLink 1
pub const MAVLINK_V1_HEADER_LEN: usize = 6;

/// Header size after (and including) the start marker, MAVLink 2
pub const MAVLINK_V2_HEADER_LEN: usize = 10;

/// Checksum size
pub const MAVLINK_CHECKSUM_LEN: usize = 2;

/// Signature block appended to signed MAVLink 2 frames
pub const MAVLINK_SIGNATURE_LEN: usize = 13;

/// MAVLink 2 incompat flag: frame is signed
pub const MAVLINK_IFLAG_SIGNED: u8 = 0x01;

/// Largest payload either version can carry
pub const MAVLINK_MAX_PAYLOAD_LEN: usize = 255;

pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_SET_MODE: u32 = 11;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_SCALED_PRESSURE: u32 = 29;
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_ID_MISSION_CURRENT: u32 = 42;
pub const MSG_ID_MISSION_REQUEST_LIST: u32 = 43;
pub const MSG_ID_MISSION_COUNT: u32 = 44;
pub const MSG_ID_NAV_CONTROLLER_OUTPUT: u32 = 62;
pub const MSG_ID_REQUEST_DATA_STREAM: u32 = 66;
pub const MSG_ID_VFR_HUD: u32 = 74;
pub const MSG_ID_GPS2_RAW: u32 = 124;
pub const MSG_ID_STATUSTEXT: u32 = 253;

/// MAV_TYPE_GCS
pub const MAV_TYPE_GCS: u8 = 6;

/// MAV_AUTOPILOT_INVALID
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// MAV_MODE_FLAG_SAFETY_ARMED
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

/// MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
pub const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 0x01;

/// MAV_DATA_STREAM_ALL
pub const MAV_DATA_STREAM_ALL: u8 = 0;

/// MAV_SEVERITY_ERROR
pub const MAV_SEVERITY_ERROR: u8 = 3;

/// GPS_FIX_TYPE_3D_FIX
pub const GPS_FIX_TYPE_3D: u8 = 3;

/// Upper-case name of a message type in the ardupilotmega dialect
///
/// Returns `None` for ids the dialect does not define.
pub fn message_name(id: u32) -> Option<&'static str> {
    ardupilotmega::MavMessage::default_message_from_id(id)
        .ok()
        .map(|msg| msg.message_name())
}

/// CRC_EXTRA seed byte for a message id, `None` if the dialect lacks it
pub fn crc_extra(id: u32) -> Option<u8> {
    message_name(id).map(|_| ardupilotmega::MavMessage::extra_crc(id))
}

/// Wire protocol version of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MavVersion {
    #[default]
    V1,
    V2,
}

impl MavVersion {
    /// Start marker for this version
    pub fn stx(self) -> u8 {
        match self {
            Self::V1 => MAVLINK_V1_STX,
            Self::V2 => MAVLINK_V2_STX,
        }
    }

    /// Header length including the start marker
    pub fn header_len(self) -> usize {
        match self {
            Self::V1 => MAVLINK_V1_HEADER_LEN,
            Self::V2 => MAVLINK_V2_HEADER_LEN,
        }
    }
}

impl From<MavVersion> for MavlinkVersion {
    fn from(version: MavVersion) -> Self {
        match version {
            MavVersion::V1 => MavlinkVersion::V1,
            MavVersion::V2 => MavlinkVersion::V2,
        }
    }
}

/// One complete MAVLink frame as received from (or sent to) a link
///
/// The original bytes are kept alongside the parsed header so the frame
/// can be forwarded and logged verbatim, including message types the
/// dialect does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wire version
    pub version: MavVersion,
    /// Sender's sequence number
    pub seq: u8,
    /// Sender system id
    pub system_id: u8,
    /// Sender component id
    pub component_id: u8,
    /// Message id (8 bits on MAVLink 1, 24 bits on MAVLink 2)
    pub message_id: u32,
    /// Receipt time in microseconds since the Unix epoch
    pub timestamp_us: Option<u64>,
    raw: Bytes,
    payload_start: usize,
    payload_len: usize,
}

impl Frame {
    /// Wrap already-validated frame bytes
    pub(crate) fn from_parts(
        version: MavVersion,
        raw: Bytes,
        payload_len: usize,
    ) -> Self {
        let (seq, system_id, component_id, message_id) = match version {
            MavVersion::V1 => (raw[2], raw[3], raw[4], raw[5] as u32),
            MavVersion::V2 => (
                raw[4],
                raw[5],
                raw[6],
                u32::from_le_bytes([raw[7], raw[8], raw[9], 0]),
            ),
        };

        Self {
            version,
            seq,
            system_id,
            component_id,
            message_id,
            timestamp_us: None,
            raw,
            payload_start: version.header_len(),
            payload_len,
        }
    }

    /// Exact frame bytes, suitable for forwarding or logging
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Payload bytes as they appeared on the wire (MAVLink 2 may truncate)
    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload_start..self.payload_start + self.payload_len]
    }

    /// Payload zero-extended to at least `len` bytes
    pub fn payload_padded(&self, len: usize) -> Vec<u8> {
        let mut payload = self.payload().to_vec();
        if payload.len() < len {
            payload.resize(len, 0);
        }
        payload
    }

    /// Upper-case message name, `UNKNOWN` for ids outside the dialect
    pub fn name(&self) -> &'static str {
        message_name(self.message_id).unwrap_or("UNKNOWN")
    }

    /// Decode the payload with the ardupilotmega dialect
    ///
    /// Truncated MAVLink 2 payloads are zero-extended by the decoder.
    /// Returns `None` for unknown ids and for payloads carrying enum values
    /// the dialect does not define.
    pub fn decode(&self) -> Option<ardupilotmega::MavMessage> {
        ardupilotmega::MavMessage::parse(self.version.into(), self.message_id, self.payload()).ok()
    }

    /// Autopilot boot-relative time carried by the message, if any
    pub fn time_boot_ms(&self) -> Option<u32> {
        use ardupilotmega::MavMessage as M;

        match self.decode()? {
            M::SYSTEM_TIME(data) => Some(data.time_boot_ms),
            M::SCALED_IMU(data) => Some(data.time_boot_ms),
            M::SCALED_PRESSURE(data) => Some(data.time_boot_ms),
            M::ATTITUDE(data) => Some(data.time_boot_ms),
            M::ATTITUDE_QUATERNION(data) => Some(data.time_boot_ms),
            M::LOCAL_POSITION_NED(data) => Some(data.time_boot_ms),
            M::GLOBAL_POSITION_INT(data) => Some(data.time_boot_ms),
            M::RC_CHANNELS_RAW(data) => Some(data.time_boot_ms),
            M::RC_CHANNELS(data) => Some(data.time_boot_ms),
            M::SCALED_IMU2(data) => Some(data.time_boot_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(MAVLINK_V1_STX, 0xFE);
        assert_eq!(MAVLINK_V2_STX, 0xFD);
        assert_eq!(MavVersion::V1.header_len(), 6);
        assert_eq!(MavVersion::V2.header_len(), 10);
    }

    #[test]
    fn test_dialect_lookup() {
        assert_eq!(message_name(MSG_ID_HEARTBEAT), Some("HEARTBEAT"));
        assert_eq!(message_name(30), Some("ATTITUDE"));
        assert_eq!(message_name(22), Some("PARAM_VALUE"));
        assert_eq!(crc_extra(MSG_ID_HEARTBEAT), Some(50));
        assert_eq!(crc_extra(MSG_ID_GPS_RAW_INT), Some(24));
        assert_eq!(crc_extra(30), Some(39));
        assert!(message_name(0xABCDEF).is_none());
        assert!(crc_extra(0xABCDEF).is_none());
    }

    #[test]
    fn test_version_conversion() {
        assert!(matches!(MavlinkVersion::from(MavVersion::V1), MavlinkVersion::V1));
        assert!(matches!(MavlinkVersion::from(MavVersion::V2), MavlinkVersion::V2));
    }
}
