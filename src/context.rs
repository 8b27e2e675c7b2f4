//! # Proxy Context
//!
//! The handle modules and commands get to the running proxy: vehicle state,
//! links, settings, the command table and the console.
//!
//! Reads are open. Writes go through a small set of methods so every
//! mutation of shared state has a name.

use std::collections::VecDeque;
use tracing::debug;

use crate::console::Console;
use crate::error::{ProxyError, Result};
use crate::link::{HealthTransition, LinkSet};
use crate::mavlink::encoder::encode_set_mode_payload;
use crate::mavlink::modes::mode_number;
use crate::mavlink::protocol::MSG_ID_SET_MODE;
use crate::module::commands::{CommandTable, CompletionSources};
use crate::settings::{Setting, SettingValue, Settings, SOURCE_COMPONENT, SOURCE_SYSTEM};
use crate::state::{StateEvent, VehicleState};

/// Built-in commands: name, help, completion rules
pub const BUILTIN_COMMANDS: &[(&str, &str, &[&str])] = &[
    ("help", "show command help", &[]),
    ("script", "run a command script", &["(FILENAME)"]),
    ("status", "show vehicle status", &[]),
    ("set", "show or change a setting", &["(SETTING)"]),
    ("link", "show link status", &["<list|set>"]),
    ("watch", "print messages matching a pattern", &[]),
    ("module", "module control", &["<list|load|unload|reload>", "(MODULE)"]),
    ("alias", "command aliases", &["<add|remove|list>", "(ALIAS)"]),
    ("exit", "exit the proxy", &[]),
    ("reset", "forget vehicle state and link statistics", &[]),
];

/// An extra byte source requested by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub owner: String,
    pub endpoint: String,
}

pub struct ProxyContext {
    state: VehicleState,
    links: LinkSet,
    settings: Settings,
    commands: CommandTable,
    console: Console,
    module_settings: Vec<(String, String)>,
    pending_commands: VecDeque<String>,
    source_requests: Vec<SourceRequest>,
    source_releases: Vec<String>,
    exit_requested: bool,
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("target_system", &self.state.target_system())
            .field("masters", &self.links.masters().len())
            .field("outputs", &self.links.outputs().len())
            .finish_non_exhaustive()
    }
}

impl ProxyContext {
    pub fn new(state: VehicleState, links: LinkSet, settings: Settings, console: Console) -> Self {
        let mut commands = CommandTable::new();
        for (name, help, completions) in BUILTIN_COMMANDS {
            commands.register_builtin(name, help, completions);
        }

        Self {
            state,
            links,
            settings,
            commands,
            console,
            module_settings: Vec::new(),
            pending_commands: VecDeque::new(),
            source_requests: Vec::new(),
            source_releases: Vec::new(),
            exit_requested: false,
        }
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut VehicleState {
        &mut self.state
    }

    pub fn links(&self) -> &LinkSet {
        &self.links
    }

    pub(crate) fn links_mut(&mut self) -> &mut LinkSet {
        &mut self.links
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub(crate) fn commands_mut(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    pub fn console(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Announce an operator-visible event
    pub fn announce(&mut self, text: impl Into<String>) {
        self.console.announce(text);
    }

    pub fn target_system(&self) -> u8 {
        self.state.target_system()
    }

    pub fn target_component(&self) -> u8 {
        self.state.target_component()
    }

    pub fn source_system(&self) -> u8 {
        self.settings.byte(SOURCE_SYSTEM)
    }

    pub fn source_component(&self) -> u8 {
        self.settings.byte(SOURCE_COMPONENT)
    }

    /// Index of the master commands currently go to
    pub fn primary_link(&self) -> usize {
        self.links.primary_index()
    }

    /// Register a command for `owner` (a module name)
    pub fn register_command(&mut self, owner: &str, name: &str, help: &str) -> Result<()> {
        self.commands.register(owner, name, help)
    }

    /// Set argument completion rules such as `(SETTING)` or `<on|off>`
    pub fn register_completions(&mut self, name: &str, rules: &[&str]) -> Result<()> {
        self.commands.set_completions(name, rules)
    }

    /// Add a module-specific setting, removed again when `owner` unloads
    pub fn add_setting(&mut self, owner: &str, setting: Setting) -> bool {
        let name = setting.name.clone();
        let added = self.settings.add(setting);
        if added {
            self.module_settings.push((owner.to_string(), name));
        }
        added
    }

    /// Change a setting as if typed with `set`
    pub fn set_setting(&mut self, name: &str, value: &str) -> Result<SettingValue> {
        self.settings.set(name, value).cloned()
    }

    /// Ask the event loop to read `endpoint` and pass its bytes to
    /// `owner`'s [`handle_source`](crate::module::Module::handle_source)
    pub fn add_source(&mut self, owner: &str, endpoint: &str) {
        self.source_requests.push(SourceRequest {
            owner: owner.to_string(),
            endpoint: endpoint.to_string(),
        });
    }

    pub(crate) fn take_source_requests(&mut self) -> Vec<SourceRequest> {
        std::mem::take(&mut self.source_requests)
    }

    pub(crate) fn take_source_releases(&mut self) -> Vec<String> {
        std::mem::take(&mut self.source_releases)
    }

    /// Drop the commands, settings and sources `owner` registered
    pub(crate) fn release_module_resources(&mut self, owner: &str) {
        self.commands.remove_owner(owner);
        let settings = &mut self.settings;
        self.module_settings.retain(|(o, name)| {
            if o == owner {
                settings.remove(name);
                false
            } else {
                true
            }
        });
        self.source_requests.retain(|r| r.owner != owner);
        self.source_releases.push(owner.to_string());
    }

    /// Queue a command line to run after the current one
    pub fn queue_command(&mut self, line: impl Into<String>) {
        self.pending_commands.push_back(line.into());
    }

    pub(crate) fn take_pending_command(&mut self) -> Option<String> {
        self.pending_commands.pop_front()
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Encode `payload` and send it to the primary master
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] if there is no master or the
    /// frame cannot be queued.
    pub fn send_to_master(&mut self, message_id: u32, payload: &[u8]) -> Result<()> {
        let (system, component) = (self.source_system(), self.source_component());
        let link = self
            .links
            .primary_mut()
            .ok_or_else(|| ProxyError::transport("master", "no master link"))?;
        link.send_message(system, component, message_id, payload)
    }

    /// Ask the vehicle to switch to the named flight mode
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Command`] when the name is not a mode of the
    /// current vehicle type.
    pub fn set_flight_mode(&mut self, name: &str) -> Result<()> {
        let class = self.state.vehicle_class();
        let number = mode_number(class, name)
            .ok_or_else(|| ProxyError::Command(format!("Unknown mode {}", name)))?;
        let payload = encode_set_mode_payload(self.target_system(), number);
        self.send_to_master(MSG_ID_SET_MODE, &payload)
    }

    /// Announce a link health change
    pub fn record_link_health(&mut self, link: usize, transition: HealthTransition) {
        match transition {
            HealthTransition::Established => debug!("link {} established", link + 1),
            HealthTransition::Recovered => self.announce(format!("link {} OK", link + 1)),
            HealthTransition::Lost => self.announce(format!("link {} down", link + 1)),
        }
    }

    /// Announce a vehicle state change
    pub fn record_state_event(&mut self, event: StateEvent) {
        self.announce(event.to_string());
    }

    /// Sources for tab completion
    pub fn completion_sources(&self, modules: Vec<String>) -> CompletionSources {
        CompletionSources {
            modules,
            settings: self.settings.names().into_iter().map(str::to_string).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::link::transport::memory_pair;
    use crate::link::{Link, LinkRole};
    use crate::mavlink::{FrameParser, ParseEvent};
    use crate::settings::{SettingKind, STREAMRATE};
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Context with no links and a quiet console
    pub(crate) fn test_context() -> ProxyContext {
        let settings = Settings::from_config(&Config::default());
        ProxyContext::new(VehicleState::new(1, 1), LinkSet::default(), settings, Console::quiet(100))
    }

    #[test]
    fn test_builtins_registered() {
        let ctx = test_context();
        assert_eq!(ctx.commands().len(), BUILTIN_COMMANDS.len());
        assert!(ctx.commands().lookup("module").unwrap().owner.is_none());
    }

    #[test]
    fn test_link_health_announcements() {
        let mut ctx = test_context();
        ctx.record_link_health(1, HealthTransition::Established);
        ctx.record_link_health(1, HealthTransition::Lost);
        ctx.record_link_health(1, HealthTransition::Recovered);
        let lines: Vec<_> = ctx.console().history().collect();
        assert_eq!(lines, vec!["link 2 down", "link 2 OK"]);
    }

    #[test]
    fn test_send_without_master_fails() {
        let mut ctx = test_context();
        assert!(matches!(ctx.send_to_master(0, &[0u8; 9]), Err(ProxyError::Transport { .. })));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut ctx = test_context();
        assert!(matches!(ctx.set_flight_mode("GUIDED"), Err(ProxyError::Command(_))));
    }

    #[tokio::test]
    async fn test_send_to_master_uses_source_ids() {
        let (transport, mut peer) = memory_pair("veh");
        let link = Link::attach(0, LinkRole::Master, Box::new(transport), Arc::new(Notify::new()));
        let settings = Settings::from_config(&Config::default());
        let mut ctx = ProxyContext::new(
            VehicleState::new(1, 1),
            LinkSet::new(vec![link], Vec::new(), 0),
            settings,
            Console::quiet(10),
        );

        ctx.send_to_master(0, &[0u8; 9]).unwrap();
        let bytes = peer.from_link.recv().await.unwrap();
        match FrameParser::new().push(&bytes).remove(0) {
            ParseEvent::Frame(f) => {
                assert_eq!(f.system_id, 255);
                assert_eq!(f.component_id, 0);
            }
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[test]
    fn test_module_resources_released() {
        let mut ctx = test_context();
        ctx.register_command("wp", "wp", "waypoints").unwrap();
        let setting = Setting::new("wpdelay", SettingKind::Int { min: 0, max: 10 }, SettingValue::Int(1), "");
        assert!(ctx.add_setting("wp", setting));
        ctx.add_source("wp", "udp:0.0.0.0:14560");

        ctx.release_module_resources("wp");
        assert!(ctx.commands().lookup("wp").is_none());
        assert!(ctx.settings().get("wpdelay").is_none());
        assert!(ctx.take_source_requests().is_empty());
        assert_eq!(ctx.take_source_releases(), vec!["wp".to_string()]);
        // Built-in settings are untouched
        assert!(ctx.settings().get(STREAMRATE).is_some());
    }

    #[test]
    fn test_queued_commands_in_order() {
        let mut ctx = test_context();
        ctx.queue_command("mode GUIDED");
        ctx.queue_command("wp list");
        assert_eq!(ctx.take_pending_command().as_deref(), Some("mode GUIDED"));
        assert_eq!(ctx.take_pending_command().as_deref(), Some("wp list"));
        assert!(ctx.take_pending_command().is_none());
    }
}
