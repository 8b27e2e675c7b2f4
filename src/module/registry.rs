//! Loaded modules and the boundary every call into them goes through
//!
//! A failing hook (error or panic) is reported and the remaining modules
//! still run. Reloading a module means unloading it and building a fresh
//! instance from its factory.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

use super::Module;
use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::mavlink::{Frame, MavMessage};
use crate::settings::MODDEBUG;

/// Builds a fresh module instance
pub type ModuleFactory = fn() -> Box<dyn Module>;

/// Result of [`ModuleRegistry::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The name was already loaded; nothing changed
    AlreadyLoaded,
}

struct LoadedModule {
    name: String,
    module: Box<dyn Module>,
}

/// Factories by name, and the modules currently loaded (in load order)
#[derive(Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
    loaded: Vec<LoadedModule>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded_names())
            .finish()
    }
}

/// Run a module hook, turning a panic into a module error
fn guarded<T>(module: &str, hook: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ProxyError::module(module, format!("panicked: {}", reason)))
        }
    }
}

/// Tell the operator a hook failed; detail depends on `moddebug`
fn report(ctx: &mut ProxyContext, hook: &str, err: &ProxyError) {
    warn!("{} failed: {}", hook, err);
    let text = if ctx.settings().int(MODDEBUG) >= 2 {
        format!("{} failed: {:?}", hook, err)
    } else {
        format!("{} failed: {}", hook, err)
    };
    ctx.console().writeln(text);
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` loadable; a later registration replaces the factory,
    /// which the next reload picks up
    pub fn register_factory(&mut self, name: &str, factory: ModuleFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Names that can be loaded
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.iter().map(|m| m.name.clone()).collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Description of a loaded module
    pub fn description(&self, name: &str) -> Option<&str> {
        self.loaded
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.module.description())
    }

    /// Construct and initialise `name`
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Module`] if there is no such module or its
    /// initialisation fails. A failed load leaves nothing registered.
    pub fn load(&mut self, ctx: &mut ProxyContext, name: &str) -> Result<LoadOutcome> {
        if self.is_loaded(name) {
            warn!("Module {} already loaded", name);
            ctx.console().writeln(format!("Module {} already loaded", name));
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let factory = *self
            .factories
            .get(name)
            .ok_or_else(|| ProxyError::module(name, "no such module"))?;
        let mut module = guarded(name, || Ok(factory()))?;

        if let Err(e) = guarded(name, || module.init(ctx)) {
            ctx.release_module_resources(name);
            return Err(e);
        }

        info!("Loaded module {}", name);
        ctx.console().writeln(format!("Loaded module {}", name));
        self.loaded.push(LoadedModule {
            name: name.to_string(),
            module,
        });
        Ok(LoadOutcome::Loaded)
    }

    /// Run `name`'s cleanup hook and remove it with its commands
    ///
    /// The module is removed even if its cleanup fails; the failure is
    /// returned.
    pub fn unload(&mut self, ctx: &mut ProxyContext, name: &str) -> Result<()> {
        let index = self
            .loaded
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| ProxyError::module(name, "not loaded"))?;
        let mut entry = self.loaded.remove(index);

        let result = guarded(name, || entry.module.unload(ctx));
        ctx.release_module_resources(name);
        info!("Unloaded module {}", name);
        ctx.console().writeln(format!("Unloaded module {}", name));
        result
    }

    /// Unload then construct `name` afresh
    pub fn reload(&mut self, ctx: &mut ProxyContext, name: &str) -> Result<()> {
        if !self.is_loaded(name) {
            return Err(ProxyError::module(name, "not loaded"));
        }
        if let Err(e) = self.unload(ctx, name) {
            report(ctx, "unload", &e);
        }
        self.load(ctx, name).map(|_| ())
    }

    /// Unload everything, last loaded first
    pub fn unload_all(&mut self, ctx: &mut ProxyContext) {
        for name in self.loaded_names().into_iter().rev() {
            if let Err(e) = self.unload(ctx, &name) {
                report(ctx, "unload", &e);
            }
        }
    }

    /// Hand a master-link message to every module
    pub fn dispatch_message(&mut self, ctx: &mut ProxyContext, link: usize, frame: &Frame, msg: &MavMessage) {
        for entry in self.loaded.iter_mut() {
            let name = entry.name.as_str();
            let module = &mut entry.module;
            if let Err(e) = guarded(name, || module.handle_message(ctx, link, frame, msg)) {
                report(ctx, "handle_message", &e);
            }
        }
    }

    /// Give every module its idle slot
    pub fn idle(&mut self, ctx: &mut ProxyContext) {
        for entry in self.loaded.iter_mut() {
            let name = entry.name.as_str();
            let module = &mut entry.module;
            if let Err(e) = guarded(name, || module.idle(ctx)) {
                report(ctx, "idle", &e);
            }
        }
    }

    /// Run a module-registered command; `None` if no loaded module owns it
    pub fn dispatch_command(
        &mut self,
        ctx: &mut ProxyContext,
        command: &str,
        args: &[String],
    ) -> Option<Result<()>> {
        let owner = ctx.commands().lookup(command)?.owner.clone()?;
        let entry = self.loaded.iter_mut().find(|m| m.name == owner)?;
        let module = &mut entry.module;
        Some(guarded(&owner, || module.handle_command(ctx, command, args)))
    }

    /// Offer an unrecognised command to each module in load order
    pub fn dispatch_unknown(&mut self, ctx: &mut ProxyContext, args: &[String]) -> bool {
        for entry in self.loaded.iter_mut() {
            let name = entry.name.as_str();
            let module = &mut entry.module;
            match guarded(name, || module.handle_unknown_command(ctx, args)) {
                Ok(true) => {
                    debug!("{} handled '{}'", name, args.join(" "));
                    return true;
                }
                Ok(false) => {}
                Err(e) => report(ctx, "handle_unknown_command", &e),
            }
        }
        false
    }

    /// Deliver bytes from an extra source to the module that owns it
    pub fn dispatch_source(&mut self, ctx: &mut ProxyContext, owner: &str, source: &str, data: &[u8]) {
        let Some(entry) = self.loaded.iter_mut().find(|m| m.name == owner) else {
            debug!("Data from {} for unloaded module {}", source, owner);
            return;
        };
        let module = &mut entry.module;
        if let Err(e) = guarded(owner, || module.handle_source(ctx, source, data)) {
            report(ctx, "handle_source", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNLOADS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Echo {
        seen: usize,
    }

    impl Module for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn init(&mut self, ctx: &mut ProxyContext) -> Result<()> {
            ctx.register_command("echo", "echo", "repeat the arguments")?;
            ctx.register_command("echo", "echocount", "messages seen")
        }

        fn handle_message(&mut self, _: &mut ProxyContext, _: usize, _: &Frame, _: &MavMessage) -> Result<()> {
            self.seen += 1;
            Ok(())
        }

        fn handle_command(&mut self, ctx: &mut ProxyContext, command: &str, args: &[String]) -> Result<()> {
            match command {
                "echo" => ctx.console().writeln(args.join(" ")),
                _ => ctx.console().writeln(self.seen.to_string()),
            }
            Ok(())
        }

        fn unload(&mut self, _: &mut ProxyContext) -> Result<()> {
            UNLOADS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Faulty;

    impl Module for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn handle_message(&mut self, _: &mut ProxyContext, _: usize, _: &Frame, _: &MavMessage) -> Result<()> {
            Err(ProxyError::module("faulty", "boom"))
        }

        fn idle(&mut self, _: &mut ProxyContext) -> Result<()> {
            panic!("idle exploded");
        }

        fn handle_unknown_command(&mut self, _: &mut ProxyContext, args: &[String]) -> Result<bool> {
            Ok(args[0] == "magic")
        }
    }

    struct BrokenInit;

    impl Module for BrokenInit {
        fn name(&self) -> &str {
            "broken"
        }

        fn init(&mut self, ctx: &mut ProxyContext) -> Result<()> {
            ctx.register_command("broken", "broken", "")?;
            Err(ProxyError::module("broken", "missing file"))
        }
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register_factory("echo", || Box::new(Echo::default()));
        registry.register_factory("faulty", || Box::new(Faulty));
        registry.register_factory("broken", || Box::new(BrokenInit));
        registry
    }

    fn heartbeat() -> Frame {
        use crate::mavlink::encoder::{encode_frame, FrameHeader};
        use crate::mavlink::{FrameParser, MavVersion, ParseEvent};
        let header = FrameHeader {
            version: MavVersion::V1,
            seq: 0,
            system_id: 1,
            component_id: 1,
        };
        let raw = encode_frame(header, 0, &[0u8; 9]).unwrap();
        match FrameParser::new().push(&raw).remove(0) {
            ParseEvent::Frame(f) => f,
            other => panic!("Expected frame, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_load_is_noop() {
        let mut ctx = test_context();
        let mut registry = registry();

        assert_eq!(registry.load(&mut ctx, "echo").unwrap(), LoadOutcome::Loaded);
        let commands = ctx.commands().len();

        assert_eq!(registry.load(&mut ctx, "echo").unwrap(), LoadOutcome::AlreadyLoaded);
        assert_eq!(registry.len(), 1);
        assert_eq!(ctx.commands().len(), commands);
        assert_eq!(ctx.console().last(), Some("Module echo already loaded"));
    }

    #[tokio::test]
    async fn test_unload_removes_commands() {
        let mut ctx = test_context();
        let mut registry = registry();
        let before = ctx.commands().len();
        let unloads = UNLOADS.load(Ordering::SeqCst);

        registry.load(&mut ctx, "echo").unwrap();
        assert_eq!(ctx.commands().len(), before + 2);

        registry.unload(&mut ctx, "echo").unwrap();
        assert_eq!(ctx.commands().len(), before);
        assert!(!registry.is_loaded("echo"));
        assert!(UNLOADS.load(Ordering::SeqCst) > unloads);

        assert!(matches!(registry.unload(&mut ctx, "echo"), Err(ProxyError::Module { .. })));
    }

    #[tokio::test]
    async fn test_unknown_module_fails_to_load() {
        let mut ctx = test_context();
        assert!(registry().load(&mut ctx, "nosuch").is_err());
    }

    #[tokio::test]
    async fn test_failed_init_registers_nothing() {
        let mut ctx = test_context();
        let mut registry = registry();
        let before = ctx.commands().len();

        assert!(registry.load(&mut ctx, "broken").is_err());
        assert!(!registry.is_loaded("broken"));
        assert_eq!(ctx.commands().len(), before);
    }

    #[tokio::test]
    async fn test_reload_builds_fresh_instance() {
        let mut ctx = test_context();
        let mut registry = registry();
        registry.load(&mut ctx, "echo").unwrap();

        let frame = heartbeat();
        let msg = MavMessage::decode(&frame);
        registry.dispatch_message(&mut ctx, 0, &frame, &msg);
        registry.dispatch_message(&mut ctx, 0, &frame, &msg);

        registry.dispatch_command(&mut ctx, "echocount", &[]).unwrap().unwrap();
        assert_eq!(ctx.console().last(), Some("2"));

        registry.reload(&mut ctx, "echo").unwrap();
        registry.dispatch_command(&mut ctx, "echocount", &[]).unwrap().unwrap();
        assert_eq!(ctx.console().last(), Some("0"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_faults_do_not_stop_other_modules() {
        let mut ctx = test_context();
        let mut registry = registry();
        registry.load(&mut ctx, "faulty").unwrap();
        registry.load(&mut ctx, "echo").unwrap();

        let frame = heartbeat();
        let msg = MavMessage::decode(&frame);
        registry.dispatch_message(&mut ctx, 0, &frame, &msg);
        registry.idle(&mut ctx);

        registry.dispatch_command(&mut ctx, "echocount", &[]).unwrap().unwrap();
        assert_eq!(ctx.console().last(), Some("1"));
        assert!(ctx.console().history().any(|l| l.contains("boom")));
        assert!(ctx.console().history().any(|l| l.contains("idle exploded")));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_chain() {
        let mut ctx = test_context();
        let mut registry = registry();
        registry.load(&mut ctx, "faulty").unwrap();

        assert!(registry.dispatch_unknown(&mut ctx, &["magic".to_string()]));
        assert!(!registry.dispatch_unknown(&mut ctx, &["other".to_string()]));
        assert!(registry.dispatch_command(&mut ctx, "nosuch", &[]).is_none());
    }
}
