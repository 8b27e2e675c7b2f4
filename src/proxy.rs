//! # Proxy
//!
//! The event loop tying links, router, modules, scheduler and log writer
//! together.
//!
//! One task owns every piece of mutable state. Link pumps, the console
//! input thread and the interrupt forwarder only post to queues and poke
//! a shared [`Notify`]; the loop wakes on that or after a short timeout,
//! drains everything without blocking and goes back to waiting.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::console::Console;
use crate::context::ProxyContext;
use crate::error::Result;
use crate::link::{Link, LinkInput, LinkOptions, LinkRole, LinkSet};
use crate::mavlink::MavVersion;
use crate::module::ModuleRegistry;
use crate::modules::builtin_factories;
use crate::periodic::Scheduler;
use crate::router::Router;
use crate::settings::{Settings, REQUIREEXIT};
use crate::state::VehicleState;
use crate::telemetry::writer::LogSummary;
use crate::telemetry::{resolve_log_paths, LogWriter, SessionOptions};

/// Longest the loop sleeps when nothing wakes it
pub const LOOP_TIMEOUT: Duration = Duration::from_millis(10);

/// Init script looked for in the home directory
pub const HOME_SCRIPT: &str = ".mavinit.scr";

/// Init script looked for in the aircraft directory
pub const AIRCRAFT_SCRIPT: &str = "mavinit.scr";

/// Commands queued by modules run at most this many per iteration
const PENDING_COMMANDS_PER_POLL: usize = 64;

/// Startup choices that are not part of the configuration file
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Log into the newest flight directory instead of a new one
    pub continue_mode: bool,
    /// Run startup commands without waiting for a vehicle heartbeat
    pub nowait: bool,
    /// `--cmd` lines, run after the init scripts
    pub commands: Vec<String>,
    /// Where to look for the home init script; the user's home if unset
    pub home_dir: Option<PathBuf>,
}

/// A byte source a module asked for
pub(crate) struct ExtraSource {
    pub(crate) owner: String,
    pub(crate) endpoint: String,
    pub(crate) link: Link,
}

pub struct Proxy {
    pub(crate) ctx: ProxyContext,
    pub(crate) modules: ModuleRegistry,
    pub(crate) router: Router,
    pub(crate) scheduler: Scheduler,
    pub(crate) log_writer: Option<LogWriter>,
    pub(crate) script_depth: usize,
    sources: Vec<ExtraSource>,
    link_options: LinkOptions,
    wake: Arc<Notify>,
    input: Option<UnboundedReceiver<String>>,
    interrupts: Option<UnboundedReceiver<()>>,
    /// Startup commands held until the first heartbeat
    deferred: VecDeque<String>,
    waiting_for_heartbeat: bool,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("ctx", &self.ctx)
            .field("modules", &self.modules)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

impl Proxy {
    /// Assemble a proxy around already-open links
    ///
    /// Registers the shipped module factories but loads nothing; see
    /// [`startup`](Self::startup).
    pub fn new(config: &Config, links: LinkSet, log_writer: Option<LogWriter>, wake: Arc<Notify>) -> Self {
        let console = Console::new(config.console.history_lines);
        Self::with_console(config, links, log_writer, wake, console)
    }

    /// Like [`new`](Self::new), writing operator output to `console`
    pub fn with_console(
        config: &Config,
        links: LinkSet,
        log_writer: Option<LogWriter>,
        wake: Arc<Notify>,
        console: Console,
    ) -> Self {
        let settings = Settings::from_config(config);
        let state = VehicleState::new(config.stream.target_system, config.stream.target_component);
        let ctx = ProxyContext::new(state, links, settings, console);

        let mut modules = ModuleRegistry::new();
        for (name, factory) in builtin_factories() {
            modules.register_factory(name, factory);
        }

        let router = Router::new(log_writer.as_ref().map(LogWriter::handle));

        Self {
            ctx,
            modules,
            router,
            scheduler: Scheduler::new(f64::from(config.heartbeat.rate_hz), Instant::now()),
            log_writer,
            script_depth: 0,
            sources: Vec::new(),
            link_options: link_options(config),
            wake,
            input: None,
            interrupts: None,
            deferred: VecDeque::new(),
            waiting_for_heartbeat: false,
        }
    }

    /// Open every configured link and the session logs
    ///
    /// Must be called inside a tokio runtime. Links that cannot be reached
    /// yet are retried in the background; only configuration problems
    /// fail here.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProxyError::InvalidConfig`] for a missing or
    /// malformed endpoint, or an I/O error if the log files cannot be
    /// created.
    pub fn from_config(config: &Config, options: &StartupOptions) -> Result<Self> {
        config.require_master()?;
        let wake = Arc::new(Notify::new());
        let link_options = link_options(config);
        let forced_version = match config.link.mavlink_version {
            1 => Some(MavVersion::V1),
            2 => Some(MavVersion::V2),
            _ => None,
        };

        let mut masters = Vec::with_capacity(config.link.masters.len());
        for (index, spec) in config.link.masters.iter().enumerate() {
            let mut link = Link::open(index, LinkRole::Master, spec, &link_options, wake.clone())?;
            if let Some(version) = forced_version {
                link.force_version(version);
            }
            info!("Master {}: {}", index + 1, link.label());
            masters.push(link);
        }
        let mut outputs = Vec::with_capacity(config.link.outputs.len());
        for (index, spec) in config.link.outputs.iter().enumerate() {
            let link = Link::open(index, LinkRole::Output, spec, &link_options, wake.clone())?;
            info!("Output {}: {}", index + 1, link.label());
            outputs.push(link);
        }
        let links = LinkSet::new(masters, outputs, config.link.primary.saturating_sub(1));

        let paths = resolve_log_paths(&SessionOptions {
            logfile: &config.log.logfile,
            aircraft: config.log.aircraft.as_deref(),
            continue_mode: options.continue_mode,
            date: chrono::Local::now().date_naive(),
        })?;
        let writer = LogWriter::start(&paths, config.log.append)?;
        writer.set_flush_every_write(config.log.flush);

        Ok(Self::new(config, links, Some(writer), wake))
    }

    pub fn context(&self) -> &ProxyContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ProxyContext {
        &mut self.ctx
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Load configured modules and queue the startup scripts
    ///
    /// Scripts and `--cmd` lines run once the vehicle has sent a heartbeat,
    /// or straight away with `nowait`.
    pub fn startup(&mut self, config: &Config, options: &StartupOptions) {
        for name in &config.modules.load {
            if let Err(e) = self.modules.load(&mut self.ctx, name) {
                warn!("{}", e);
                self.ctx.console().writeln(format!("Failed to load module {}: {}", name, e));
            }
        }

        let home = options.home_dir.clone().or_else(dirs::home_dir);
        let scripts = home
            .map(|dir| dir.join(HOME_SCRIPT))
            .into_iter()
            .chain(config.log.aircraft.as_ref().map(|dir| Path::new(dir).join(AIRCRAFT_SCRIPT)));
        for script in scripts {
            if script.is_file() {
                debug!("Queueing init script {}", script.display());
                self.deferred.push_back(format!("script {}", script.display()));
            }
        }
        self.deferred.extend(options.commands.iter().cloned());

        if options.nowait {
            self.release_deferred();
        } else {
            self.waiting_for_heartbeat = true;
            self.ctx.console().writeln("Waiting for heartbeat");
        }
    }

    fn release_deferred(&mut self) {
        self.waiting_for_heartbeat = false;
        while let Some(line) = self.deferred.pop_front() {
            self.ctx.queue_command(line);
        }
    }

    /// Run one loop iteration without waiting
    pub fn poll_once(&mut self, now: Instant) {
        self.drain_interrupts();
        self.drain_input();
        self.run_pending_commands();

        self.read_masters(now);
        self.read_outputs();
        self.read_sources();

        let due = self.scheduler.poll(now);
        if due.heartbeat {
            self.router.send_heartbeats(&mut self.ctx);
        }
        if due.stream_rate {
            self.router.send_stream_rates(&mut self.ctx);
        }
        if due.link_check {
            self.router.check_links(&mut self.ctx, now);
        }

        self.modules.idle(&mut self.ctx);
        self.run_pending_commands();
        self.reconcile_sources();

        if self.waiting_for_heartbeat && self.ctx.state().heartbeat_seen() {
            info!("Got heartbeat from system {}", self.ctx.target_system());
            self.release_deferred();
        }
    }

    fn drain_interrupts(&mut self) {
        let mut interrupted = false;
        if let Some(rx) = self.interrupts.as_mut() {
            while rx.try_recv().is_ok() {
                interrupted = true;
            }
        }
        if interrupted {
            self.handle_interrupt();
        }
    }

    /// Ctrl-C: exit, unless `requireexit` is set
    pub fn handle_interrupt(&mut self) {
        if self.ctx.settings().flag(REQUIREEXIT) {
            self.ctx.console().writeln("Use 'exit' to quit");
        } else {
            info!("Interrupted, shutting down");
            self.ctx.request_exit();
        }
    }

    fn drain_input(&mut self) {
        let mut lines = Vec::new();
        if let Some(rx) = self.input.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(line) => lines.push(line),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("Console input closed");
                        self.input = None;
                        break;
                    }
                }
            }
        }
        for line in lines {
            self.run_line(&line);
        }
    }

    /// Run commands modules queued (and released startup commands)
    pub fn run_pending_commands(&mut self) {
        for _ in 0..PENDING_COMMANDS_PER_POLL {
            let Some(line) = self.ctx.take_pending_command() else {
                break;
            };
            self.run_line(&line);
        }
    }

    fn read_masters(&mut self, now: Instant) {
        for index in 0..self.ctx.links().masters().len() {
            let inputs = match self.ctx.links_mut().master_mut(index) {
                Some(link) => link.read(),
                None => continue,
            };
            for input in inputs {
                self.router
                    .handle_master_input(&mut self.ctx, &mut self.modules, index, input, now);
            }
        }
    }

    fn read_outputs(&mut self) {
        for index in 0..self.ctx.links().outputs().len() {
            let inputs = match self.ctx.links_mut().output_mut(index) {
                Some(link) => link.read(),
                None => continue,
            };
            for input in inputs {
                self.router.handle_output_input(&mut self.ctx, index, input);
            }
        }
    }

    fn read_sources(&mut self) {
        for source in self.sources.iter_mut() {
            for input in source.link.read() {
                match input {
                    LinkInput::Raw(bytes) => {
                        self.modules
                            .dispatch_source(&mut self.ctx, &source.owner, &source.endpoint, &bytes)
                    }
                    LinkInput::TransportDown(reason) => {
                        debug!("{} source {}: {}", source.owner, source.endpoint, reason)
                    }
                    _ => {}
                }
            }
        }
    }

    /// Open sources modules asked for and close those of unloaded modules
    fn reconcile_sources(&mut self) {
        for owner in self.ctx.take_source_releases() {
            self.sources.retain(|s| s.owner != owner);
        }
        for request in self.ctx.take_source_requests() {
            let index = self.sources.len();
            match Link::open(index, LinkRole::Output, &request.endpoint, &self.link_options, self.wake.clone()) {
                Ok(link) => {
                    info!("{} reading {}", request.owner, link.label());
                    self.sources.push(ExtraSource {
                        owner: request.owner,
                        endpoint: request.endpoint,
                        link,
                    });
                }
                Err(e) => {
                    let text = format!("{}: cannot add source {}: {}", request.owner, request.endpoint, e);
                    self.ctx.console().writeln(text);
                }
            }
        }
    }

    /// Extra sources currently open, as (owner, endpoint)
    pub fn sources(&self) -> Vec<(&str, &str)> {
        self.sources
            .iter()
            .map(|s| (s.owner.as_str(), s.endpoint.as_str()))
            .collect()
    }

    /// Run until `exit` (or Ctrl-C without `requireexit`)
    ///
    /// Returns what the log writer wrote.
    pub async fn run(mut self) -> LogSummary {
        self.input = Some(spawn_input_thread(self.wake.clone()));
        self.interrupts = Some(spawn_interrupt_forwarder(self.wake.clone()));
        let wake = self.wake.clone();

        loop {
            self.poll_once(Instant::now());
            if self.ctx.exit_requested() {
                break;
            }
            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(LOOP_TIMEOUT) => {}
            }
        }

        self.shutdown()
    }

    /// Unload modules and close the logs
    pub fn shutdown(mut self) -> LogSummary {
        self.modules.unload_all(&mut self.ctx);
        let summary = self.log_writer.take().map(LogWriter::close).unwrap_or_default();
        info!(
            "Wrote {} tlog records and {} raw bytes",
            summary.tagged_records, summary.raw_bytes
        );
        summary
    }
}

fn link_options(config: &Config) -> LinkOptions {
    LinkOptions {
        default_baud: config.link.baud_rate,
        rtscts: config.link.rtscts,
        reconnect_interval: Duration::from_millis(config.link.reconnect_interval_ms),
    }
}

/// Read console lines on a dedicated thread
///
/// The thread ends at end of input; it is never joined, a blocked read
/// must not hold up shutdown.
fn spawn_input_thread(wake: Arc<Notify>) -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
                wake.notify_one();
            }
        });
    if let Err(e) = spawned {
        warn!("No console input: {}", e);
    }
    rx
}

fn spawn_interrupt_forwarder(wake: Arc<Notify>) -> UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
            wake.notify_one();
        }
    });
    rx
}
