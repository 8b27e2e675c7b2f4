//! `wp` command: mission summary from the vehicle
//!
//! Tracks the waypoint count and the active waypoint. It does not download
//! or edit mission items.

use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::mavlink::encoder::encode_mission_request_list_payload;
use crate::mavlink::protocol::MSG_ID_MISSION_REQUEST_LIST;
use crate::mavlink::{Frame, MavMessage};
use crate::module::Module;

pub const NAME: &str = "wp";

#[derive(Debug, Default)]
pub struct WaypointModule {
    count: Option<u16>,
    current: Option<u16>,
    requested: bool,
}

impl WaypointModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn Module> {
        Box::new(Self::new())
    }

    fn request_list(&mut self, ctx: &mut ProxyContext) -> Result<()> {
        let payload = encode_mission_request_list_payload(ctx.target_system(), ctx.target_component());
        ctx.send_to_master(MSG_ID_MISSION_REQUEST_LIST, &payload)?;
        self.requested = true;
        Ok(())
    }

    fn status(&self, ctx: &mut ProxyContext) {
        let count = self.count.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        let current = self.current.map_or_else(|| "none".to_string(), |c| c.to_string());
        ctx.console().writeln(format!("waypoints: {} current: {}", count, current));
    }
}

impl Module for WaypointModule {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "waypoint count and progress"
    }

    fn init(&mut self, ctx: &mut ProxyContext) -> Result<()> {
        ctx.register_command(NAME, NAME, "waypoint management")?;
        ctx.register_completions(NAME, &["<list|status>"])
    }

    fn handle_message(&mut self, ctx: &mut ProxyContext, _link: usize, frame: &Frame, msg: &MavMessage) -> Result<()> {
        if frame.system_id != ctx.target_system() {
            return Ok(());
        }
        match msg {
            MavMessage::MissionCount(count) => {
                self.count = Some(count.count);
                if self.requested {
                    self.requested = false;
                    ctx.console().writeln(format!("Vehicle has {} waypoints", count.count));
                }
            }
            MavMessage::MissionCurrent(current) => {
                if self.current != Some(current.seq) {
                    self.current = Some(current.seq);
                    ctx.announce(format!("waypoint {}", current.seq));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_command(&mut self, ctx: &mut ProxyContext, _command: &str, args: &[String]) -> Result<()> {
        match args.first().map(String::as_str) {
            Some("list") => self.request_list(ctx),
            Some("status") | None => {
                self.status(ctx);
                Ok(())
            }
            Some(other) => Err(ProxyError::Command(format!(
                "Unknown wp command '{}' (use list or status)",
                other
            ))),
        }
    }
}
