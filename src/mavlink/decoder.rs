//! # MAVLink Stream Decoder
//!
//! Splits a raw byte stream into frames, resynchronising after noise.

use bytes::{Bytes, BytesMut};

use super::crc::frame_crc;
use super::protocol::*;

/// One result of feeding bytes to a [`FrameParser`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A complete frame whose checksum matched (or whose type is unknown)
    Frame(Frame),
    /// Bytes that could not be framed, in stream order
    BadData {
        /// The rejected bytes
        data: Bytes,
        /// Why they were rejected
        reason: String,
    },
}

/// Incremental MAVLink 1/2 frame parser
///
/// Bytes may arrive split at any boundary. Frames of message types the
/// dialect does not define are accepted on length alone so they can be
/// forwarded verbatim, but only while the stream is in sync: after any
/// rejected byte, only a checksum-verified frame restores sync.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    pending_bad: BytesMut,
    bad_reason: Option<String>,
    in_sync: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self {
            buf: BytesMut::new(),
            pending_bad: BytesMut::new(),
            bad_reason: None,
            in_sync: true,
        }
    }
}

impl FrameParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// False between a rejected byte and the next verified frame
    pub fn in_sync(&self) -> bool {
        self.in_sync
    }

    /// Number of bytes held waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending_bad.clear();
        self.bad_reason = None;
        self.in_sync = true;
    }

    /// Feed bytes and collect every event they complete
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_proxy::mavlink::decoder::{FrameParser, ParseEvent};
    ///
    /// let mut parser = FrameParser::new();
    /// let events = parser.push(&[0x00, 0x01]);
    /// assert!(matches!(events[0], ParseEvent::BadData { .. }));
    /// ```
    pub fn push(&mut self, data: &[u8]) -> Vec<ParseEvent> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            match self.buf.iter().position(|&b| b == MAVLINK_V1_STX || b == MAVLINK_V2_STX) {
                None => {
                    let junk = self.buf.split();
                    self.mark_bad(&junk, "no start marker");
                    break;
                }
                Some(0) => {}
                Some(idx) => {
                    let junk = self.buf.split_to(idx);
                    self.mark_bad(&junk, "no start marker");
                }
            }

            let version = if self.buf[0] == MAVLINK_V2_STX {
                MavVersion::V2
            } else {
                MavVersion::V1
            };
            let header_len = version.header_len();

            if self.buf.len() < header_len {
                break;
            }

            let payload_len = self.buf[1] as usize;
            let mut total = header_len + payload_len + MAVLINK_CHECKSUM_LEN;

            if version == MavVersion::V2 {
                let incompat = self.buf[2];
                if incompat & !MAVLINK_IFLAG_SIGNED != 0 {
                    let stx = self.buf.split_to(1);
                    self.mark_bad(&stx, "unsupported incompat flags");
                    continue;
                }
                if incompat & MAVLINK_IFLAG_SIGNED != 0 {
                    total += MAVLINK_SIGNATURE_LEN;
                }
            }

            let message_id = match version {
                MavVersion::V1 => self.buf[5] as u32,
                MavVersion::V2 => u32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], 0]),
            };
            let seed = crc_extra(message_id);

            // Nothing vouches for an unknown frame found while hunting for sync
            if seed.is_none() && !self.in_sync {
                let stx = self.buf.split_to(1);
                self.mark_bad(&stx, &format!("unknown message id {} while out of sync", message_id));
                continue;
            }

            if self.buf.len() < total {
                break;
            }

            if let Some(seed) = seed {
                let crc_end = header_len + payload_len;
                let expected = frame_crc(&self.buf[1..crc_end], seed);
                let received = u16::from_le_bytes([self.buf[crc_end], self.buf[crc_end + 1]]);
                if expected != received {
                    let stx = self.buf.split_to(1);
                    self.mark_bad(&stx, &format!("bad CRC on {}", message_name(message_id).unwrap_or("UNKNOWN")));
                    continue;
                }
                self.in_sync = true;
            }

            self.flush_bad(&mut events);
            let raw = self.buf.split_to(total).freeze();
            events.push(ParseEvent::Frame(Frame::from_parts(version, raw, payload_len)));
        }

        self.flush_bad(&mut events);
        events
    }

    fn mark_bad(&mut self, bytes: &[u8], reason: &str) {
        if bytes.is_empty() {
            return;
        }
        self.in_sync = false;
        self.pending_bad.extend_from_slice(bytes);
        if self.bad_reason.is_none() {
            self.bad_reason = Some(reason.to_string());
        }
    }

    fn flush_bad(&mut self, events: &mut Vec<ParseEvent>) {
        if self.pending_bad.is_empty() {
            return;
        }
        events.push(ParseEvent::BadData {
            data: self.pending_bad.split().freeze(),
            reason: self.bad_reason.take().unwrap_or_default(),
        });
    }
}
