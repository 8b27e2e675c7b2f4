//! # MAVLink Framing Module
//!
//! Just enough of the MAVLink wire format for a routing proxy.
//!
//! This module handles:
//! - MAVLink 1 and 2 frame synchronisation and validation
//! - X.25 checksums seeded with the ardupilotmega CRC_EXTRA table
//! - Decoding the handful of messages that drive vehicle state, via the
//!   `mavlink` dialect types
//! - Encoding heartbeat, stream-rate and mode-change frames
//! - ArduPilot flight-mode naming

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod message;
pub mod modes;
pub mod protocol;

pub use decoder::{FrameParser, ParseEvent};
pub use message::MavMessage;
pub use protocol::{Frame, MavVersion};
