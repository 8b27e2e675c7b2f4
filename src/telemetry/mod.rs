//! # Telemetry Module
//!
//! Persists the MAVLink stream as a replayable log.
//!
//! This module handles:
//! - Choosing the log location (plain file or per-flight directories)
//! - Writing the raw primary-link byte stream
//! - Writing timestamped, link-tagged frame records (tlog)
//! - Reading tlog records back for replay and verification

pub mod reader;
pub mod session;
pub mod writer;

pub use reader::{TlogReader, TlogRecord};
pub use session::{resolve_log_paths, LogPaths, SessionOptions};
pub use writer::{tag_header, LogHandle, LogWriter};
