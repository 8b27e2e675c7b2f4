//! # MAV Proxy Library
//!
//! A MAVLink ground-station proxy.
//!
//! This library provides the pieces the `mav-proxy` binary is built from:
//! MAVLink framing, vehicle and ground-station links, telemetry logs, the
//! routing pipeline, operator commands and the module system.

pub mod cli;
pub mod command;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod link;
pub mod mavlink;
pub mod module;
pub mod modules;
pub mod periodic;
pub mod proxy;
pub mod router;
pub mod settings;
pub mod state;
pub mod telemetry;
