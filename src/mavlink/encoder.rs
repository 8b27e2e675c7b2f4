//! # MAVLink Frame Encoder
//!
//! Builds the handful of frames the proxy originates itself: the GCS
//! heartbeat, stream-rate requests and mode changes.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::frame_crc;
use super::protocol::*;
use crate::error::{ProxyError, Result};

/// Identity stamped into the header of outgoing frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire version to emit
    pub version: MavVersion,
    /// Sequence number
    pub seq: u8,
    /// Our system id
    pub system_id: u8,
    /// Our component id
    pub component_id: u8,
}

/// Encode a complete frame
///
/// # Arguments
///
/// * `header` - Version and sender identity
/// * `message_id` - Id of a message the ardupilotmega dialect defines
/// * `payload` - Full, untruncated payload
///
/// # Errors
///
/// Returns error if the message id has no CRC_EXTRA entry or the payload
/// does not fit the version's id or length fields.
///
/// # Examples
///
/// ```
/// use mav_proxy::mavlink::encoder::{encode_frame, FrameHeader};
/// use mav_proxy::mavlink::protocol::{MavVersion, MSG_ID_HEARTBEAT};
///
/// let header = FrameHeader { version: MavVersion::V1, seq: 0, system_id: 255, component_id: 0 };
/// let frame = encode_frame(header, MSG_ID_HEARTBEAT, &[0u8; 9]).unwrap();
/// assert_eq!(frame.len(), 17);
/// ```
pub fn encode_frame(header: FrameHeader, message_id: u32, payload: &[u8]) -> Result<Bytes> {
    let seed = crc_extra(message_id).ok_or_else(|| {
        ProxyError::Protocol(format!("No CRC_EXTRA known for message id {}", message_id))
    })?;

    if payload.len() > MAVLINK_MAX_PAYLOAD_LEN {
        return Err(ProxyError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            MAVLINK_MAX_PAYLOAD_LEN
        )));
    }

    let mut frame = BytesMut::with_capacity(
        header.version.header_len() + payload.len() + MAVLINK_CHECKSUM_LEN,
    );

    match header.version {
        MavVersion::V1 => {
            if message_id > 0xFF {
                return Err(ProxyError::Protocol(format!(
                    "Message id {} does not fit a MAVLink 1 frame",
                    message_id
                )));
            }
            frame.put_u8(MAVLINK_V1_STX);
            frame.put_u8(payload.len() as u8);
            frame.put_u8(header.seq);
            frame.put_u8(header.system_id);
            frame.put_u8(header.component_id);
            frame.put_u8(message_id as u8);
            frame.put_slice(payload);
        }
        MavVersion::V2 => {
            // Trailing zero bytes are dropped on the wire; at least one stays
            let mut len = payload.len();
            while len > 1 && payload[len - 1] == 0 {
                len -= 1;
            }
            frame.put_u8(MAVLINK_V2_STX);
            frame.put_u8(len as u8);
            frame.put_u8(0); // incompat flags
            frame.put_u8(0); // compat flags
            frame.put_u8(header.seq);
            frame.put_u8(header.system_id);
            frame.put_u8(header.component_id);
            frame.put_slice(&message_id.to_le_bytes()[..3]);
            frame.put_slice(&payload[..len]);
        }
    }

    let crc = frame_crc(&frame[1..], seed);
    frame.put_u16_le(crc);

    Ok(frame.freeze())
}

/// HEARTBEAT payload identifying this proxy as a ground station
pub fn encode_gcs_heartbeat_payload() -> Vec<u8> {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&0u32.to_le_bytes()); // custom_mode
    payload.push(MAV_TYPE_GCS);
    payload.push(MAV_AUTOPILOT_INVALID);
    payload.push(0); // base_mode
    payload.push(0); // system_status
    payload.push(3); // mavlink_version
    payload
}

/// REQUEST_DATA_STREAM payload
///
/// # Arguments
///
/// * `target_system` / `target_component` - Vehicle being asked
/// * `stream_id` - MAV_DATA_STREAM id, usually [`MAV_DATA_STREAM_ALL`]
/// * `rate_hz` - Requested rate
/// * `start` - Start (true) or stop (false) the stream
pub fn encode_request_data_stream_payload(
    target_system: u8,
    target_component: u8,
    stream_id: u8,
    rate_hz: u16,
    start: bool,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&rate_hz.to_le_bytes());
    payload.push(target_system);
    payload.push(target_component);
    payload.push(stream_id);
    payload.push(u8::from(start));
    payload
}

/// SET_MODE payload selecting an autopilot custom mode
pub fn encode_set_mode_payload(target_system: u8, custom_mode: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&custom_mode.to_le_bytes());
    payload.push(target_system);
    payload.push(MAV_MODE_FLAG_CUSTOM_MODE_ENABLED);
    payload
}

/// MISSION_REQUEST_LIST payload
pub fn encode_mission_request_list_payload(target_system: u8, target_component: u8) -> Vec<u8> {
    vec![target_system, target_component]
}

/// STATUSTEXT payload; text past 50 bytes is cut off
pub fn encode_statustext_payload(severity: u8, text: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 51];
    payload[0] = severity;
    let bytes = text.as_bytes();
    let n = bytes.len().min(50);
    payload[1..1 + n].copy_from_slice(&bytes[..n]);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_header() -> FrameHeader {
        FrameHeader {
            version: MavVersion::V1,
            seq: 0,
            system_id: 1,
            component_id: 1,
        }
    }

    #[test]
    fn test_encode_known_heartbeat_bytes() {
        // custom_mode=0, type=QUADROTOR, autopilot=ARDUPILOTMEGA, armed+custom, ACTIVE, v3
        let payload = [0, 0, 0, 0, 2, 3, 0x81, 4, 3];
        let frame = encode_frame(v1_header(), MSG_ID_HEARTBEAT, &payload).unwrap();

        assert_eq!(
            frame.as_ref(),
            &[0xFE, 0x09, 0x00, 0x01, 0x01, 0x00, 0, 0, 0, 0, 2, 3, 0x81, 4, 3, 0x05, 0x25]
        );
    }

    #[test]
    fn test_encode_unknown_message_fails() {
        let result = encode_frame(v1_header(), 0xABCDEF, &[0u8; 4]);
        assert!(matches!(result, Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let result = encode_frame(v1_header(), MSG_ID_HEARTBEAT, &[0u8; 256]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_v2_truncates_trailing_zeros() {
        let header = FrameHeader {
            version: MavVersion::V2,
            ..v1_header()
        };
        let payload = encode_request_data_stream_payload(1, 1, 0, 4, false);
        let frame = encode_frame(header, MSG_ID_REQUEST_DATA_STREAM, &payload).unwrap();

        assert_eq!(frame[0], MAVLINK_V2_STX);
        // start_stop=0 and stream_id=0 are trimmed, leaving rate + targets
        assert_eq!(frame[1], 4);
        assert_eq!(frame.len(), MAVLINK_V2_HEADER_LEN + 4 + MAVLINK_CHECKSUM_LEN);
    }

    #[test]
    fn test_statustext_payload_truncates() {
        let payload = encode_statustext_payload(MAV_SEVERITY_ERROR, &"x".repeat(80));
        assert_eq!(payload.len(), 51);
        assert_eq!(payload[0], 3);
        assert!(payload[1..].iter().all(|&b| b == b'x'));

        let payload = encode_statustext_payload(6, "ok");
        assert_eq!(&payload[1..4], b"ok\0");
    }

    #[test]
    fn test_gcs_heartbeat_payload() {
        let payload = encode_gcs_heartbeat_payload();
        assert_eq!(payload.len(), 9);
        assert_eq!(payload[4], MAV_TYPE_GCS);
        assert_eq!(payload[5], MAV_AUTOPILOT_INVALID);
    }

    #[test]
    fn test_set_mode_payload() {
        let payload = encode_set_mode_payload(7, 4);
        assert_eq!(payload, vec![4, 0, 0, 0, 7, MAV_MODE_FLAG_CUSTOM_MODE_ENABLED]);
    }
}
