//! `mode` command: list flight modes or switch to one

use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::mavlink::modes::{mode_names, VehicleClass};
use crate::mavlink::{Frame, MavMessage};
use crate::module::Module;

pub const NAME: &str = "mode";

#[derive(Debug)]
pub struct ModeModule {
    /// Vehicle class the completions were built for
    completions_for: Option<VehicleClass>,
}

impl ModeModule {
    pub fn new() -> Self {
        Self { completions_for: None }
    }

    pub fn boxed() -> Box<dyn Module> {
        Box::new(Self::new())
    }

    fn refresh_completions(&mut self, ctx: &mut ProxyContext) -> Result<()> {
        let class = ctx.state().vehicle_class();
        if self.completions_for == Some(class) {
            return Ok(());
        }
        self.completions_for = Some(class);
        let names = mode_names(class);
        if names.is_empty() {
            return ctx.register_completions(NAME, &[]);
        }
        let rule = format!("<{}>", names.join("|"));
        ctx.register_completions(NAME, &[rule.as_str()])
    }
}

impl Default for ModeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ModeModule {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "flight mode selection"
    }

    fn init(&mut self, ctx: &mut ProxyContext) -> Result<()> {
        ctx.register_command(NAME, NAME, "show or change the flight mode")?;
        self.refresh_completions(ctx)
    }

    fn handle_message(&mut self, ctx: &mut ProxyContext, _link: usize, _frame: &Frame, msg: &MavMessage) -> Result<()> {
        if matches!(msg, MavMessage::Heartbeat(_)) {
            self.refresh_completions(ctx)?;
        }
        Ok(())
    }

    fn handle_command(&mut self, ctx: &mut ProxyContext, _command: &str, args: &[String]) -> Result<()> {
        match args {
            [] => {
                let names = mode_names(ctx.state().vehicle_class());
                if names.is_empty() {
                    return Err(ProxyError::Command(
                        "No vehicle type known yet, wait for a heartbeat".into(),
                    ));
                }
                ctx.console().writeln(format!("Available modes: {}", names.join(" ")));
                Ok(())
            }
            [name] => ctx.set_flight_mode(name),
            _ => Err(ProxyError::Command("Usage: mode [NAME]".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use crate::mavlink::encoder::{encode_frame, FrameHeader};
    use crate::mavlink::protocol::MSG_ID_HEARTBEAT;
    use crate::mavlink::{FrameParser, MavVersion, ParseEvent};
    use crate::state::Thresholds;

    fn copter_heartbeat() -> Frame {
        let header = FrameHeader {
            version: MavVersion::V1,
            seq: 0,
            system_id: 1,
            component_id: 1,
        };
        let bytes = encode_frame(header, MSG_ID_HEARTBEAT, &[0, 0, 0, 0, 2, 3, 0, 4, 3]).unwrap();
        match FrameParser::new().push(&bytes).remove(0) {
            ParseEvent::Frame(f) => f,
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_list_needs_vehicle_type() {
        let mut ctx = test_context();
        let mut module = ModeModule::new();
        module.init(&mut ctx).unwrap();
        assert!(module.handle_command(&mut ctx, NAME, &[]).is_err());
    }

    #[test]
    fn test_list_and_completions_follow_vehicle() {
        let mut ctx = test_context();
        let mut module = ModeModule::new();
        module.init(&mut ctx).unwrap();

        let frame = copter_heartbeat();
        let msg = MavMessage::decode(&frame);
        ctx.state_mut().apply(&frame, &msg, Thresholds::default());
        module.handle_message(&mut ctx, 0, &frame, &msg).unwrap();

        module.handle_command(&mut ctx, NAME, &[]).unwrap();
        assert!(ctx.console().last().unwrap().contains("GUIDED"));

        let sources = ctx.completion_sources(vec![]);
        assert!(ctx.commands().complete("mode GUI", &sources).contains(&"GUIDED".to_string()));
    }

    #[test]
    fn test_too_many_arguments() {
        let mut ctx = test_context();
        let mut module = ModeModule::new();
        let args = vec!["GUIDED".to_string(), "now".to_string()];
        assert!(matches!(module.handle_command(&mut ctx, NAME, &args), Err(ProxyError::Command(_))));
    }
}
