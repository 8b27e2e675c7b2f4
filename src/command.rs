//! # Operator Commands
//!
//! Turns console lines into actions. A line holds one or more commands
//! separated by `;`; each command is looked up in this order:
//!
//! 1. alias expansion (one level)
//! 2. built-in commands
//! 3. commands registered by loaded modules
//! 4. each module's unknown-command hook, in load order
//! 5. a bare flight mode name, as `mode NAME`
//!
//! Anything left over is reported as an unknown command. Errors never
//! leave this module: they are written to the console and the loop goes
//! on.

use std::fs;

use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::link::LinkHealth;
use crate::mavlink::modes::mode_number;
use crate::mavlink::protocol::message_name;
use crate::proxy::Proxy;
use crate::router::glob_match;
use crate::settings::{FLUSHLOGS, HEARTBEAT, LINK, MODDEBUG, TARGET_COMPONENT, TARGET_SYSTEM};

/// Nesting limit for `script` commands calling scripts
pub const MAX_SCRIPT_DEPTH: usize = 8;

/// Split a console line into commands on `;`
///
/// # Examples
///
/// ```
/// use mav_proxy::command::split_commands;
///
/// assert_eq!(split_commands("mode GUIDED; wp list;;"), vec!["mode GUIDED", "wp list"]);
/// ```
pub fn split_commands(line: &str) -> Vec<String> {
    line.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split one command into words
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn usage(text: &str) -> ProxyError {
    ProxyError::Command(format!("usage: {}", text))
}

fn health_label(health: LinkHealth) -> &'static str {
    match health {
        LinkHealth::Pending => "waiting",
        LinkHealth::Healthy => "OK",
        LinkHealth::Unhealthy => "DOWN",
    }
}

impl Proxy {
    /// Run every command on a console line, in order
    pub fn run_line(&mut self, line: &str) {
        for command in split_commands(line) {
            if let Err(e) = self.run_command(&command) {
                self.report_command_error(&e);
            }
        }
    }

    fn report_command_error(&mut self, error: &ProxyError) {
        debug!("Command failed: {:?}", error);
        let text = if self.ctx.settings().int(MODDEBUG) >= 2 {
            format!("{:?}", error)
        } else {
            error.to_string()
        };
        self.ctx.console().writeln(text);
    }

    /// Run a single command
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Command`] for unknown commands and bad
    /// arguments, or whatever the handling module returned.
    pub fn run_command(&mut self, command: &str) -> Result<()> {
        let args = self.ctx.commands().expand_alias(tokenize(command));
        let Some((name, rest)) = args.split_first() else {
            return Ok(());
        };

        match name.as_str() {
            "help" => return self.cmd_help(rest),
            "script" => return self.cmd_script(rest),
            "status" => return self.cmd_status(rest),
            "set" => return self.cmd_set(rest),
            "link" => return self.cmd_link(rest),
            "watch" => return self.cmd_watch(rest),
            "module" => return self.cmd_module(rest),
            "alias" => return self.cmd_alias(rest),
            "exit" => {
                self.ctx.request_exit();
                return Ok(());
            }
            "reset" => return self.cmd_reset(),
            _ => {}
        }

        if let Some(result) = self.modules.dispatch_command(&mut self.ctx, name, rest) {
            return result;
        }
        if self.modules.dispatch_unknown(&mut self.ctx, &args) {
            return Ok(());
        }
        if rest.is_empty() && mode_number(self.ctx.state().vehicle_class(), name).is_some() {
            return self.ctx.set_flight_mode(name);
        }

        Err(ProxyError::Command(format!("Unknown command '{}'", command)))
    }

    /// Completion candidates for the last word of `line`
    pub fn complete(&self, line: &str) -> Vec<String> {
        let sources = self.ctx.completion_sources(self.modules.available());
        self.ctx.commands().complete(line, &sources)
    }

    fn cmd_help(&mut self, args: &[String]) -> Result<()> {
        let lines: Vec<String> = match args.first() {
            Some(name) => {
                let entry = self
                    .ctx
                    .commands()
                    .lookup(name)
                    .ok_or_else(|| ProxyError::Command(format!("No help for '{}'", name)))?;
                vec![format!("{:<12} {}", entry.name, entry.help)]
            }
            None => self
                .ctx
                .commands()
                .iter()
                .map(|entry| format!("{:<12} {}", entry.name, entry.help))
                .collect(),
        };
        for line in lines {
            self.ctx.console().writeln(line);
        }
        Ok(())
    }

    fn cmd_script(&mut self, args: &[String]) -> Result<()> {
        let [path] = args else {
            return Err(usage("script FILENAME"));
        };
        if self.script_depth >= MAX_SCRIPT_DEPTH {
            return Err(ProxyError::Command(format!("Scripts nested too deeply at {}", path)));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| ProxyError::Command(format!("Cannot read script {}: {}", path, e)))?;

        debug!("Running script {}", path);
        self.script_depth += 1;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.run_line(line);
        }
        self.script_depth -= 1;
        Ok(())
    }

    fn cmd_status(&mut self, args: &[String]) -> Result<()> {
        if let Some(pattern) = args.first() {
            let mut lines: Vec<String> = self
                .ctx
                .state()
                .messages()
                .filter_map(|(id, seen)| {
                    let name = message_name(*id).unwrap_or("UNKNOWN");
                    glob_match(pattern, name).then(|| format!("{} ({}): {}", name, id, seen.count))
                })
                .collect();
            lines.sort();
            if lines.is_empty() {
                lines.push(format!("No messages matching {}", pattern));
            }
            for line in lines {
                self.ctx.console().writeln(line);
            }
            return Ok(());
        }

        let state = self.ctx.state();
        let mut lines = vec![
            format!(
                "target {}:{} ({:?})",
                state.target_system(),
                state.target_component(),
                state.vehicle_class()
            ),
            format!(
                "mode {} {}",
                state.flight_mode().unwrap_or("unknown"),
                if state.armed() { "ARMED" } else { "DISARMED" }
            ),
        ];
        lines.push(match state.gps_locked() {
            Some(true) => "GPS OK".to_string(),
            Some(false) => "GPS no fix".to_string(),
            None => "GPS unknown".to_string(),
        });
        if let Some(battery) = state.battery_remaining() {
            lines.push(format!("battery {}%", battery));
        }
        if let Some(altitude) = state.altitude() {
            lines.push(format!("altitude {:.1}m", altitude));
        }
        let (types, total) = state
            .messages()
            .fold((0usize, 0u64), |(types, total), (_, seen)| (types + 1, total + seen.count));
        lines.push(format!("{} messages of {} types", total, types));

        for line in lines {
            self.ctx.console().writeln(line);
        }
        Ok(())
    }

    fn cmd_set(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => {
                let lines: Vec<String> = self
                    .ctx
                    .settings()
                    .iter()
                    .map(|s| format!("{:<18} {}", s.name, s.value))
                    .collect();
                for line in lines {
                    self.ctx.console().writeln(line);
                }
                Ok(())
            }
            [name] => {
                let setting = self
                    .ctx
                    .settings()
                    .lookup(name)
                    .ok_or_else(|| ProxyError::Command(format!("Unknown setting '{}'", name)))?;
                let line = format!("{} {} ({})", setting.name, setting.value, setting.help);
                self.ctx.console().writeln(line);
                Ok(())
            }
            [name, value @ ..] => self.change_setting(name, &value.join(" ")),
        }
    }

    /// Set a value and carry the change into the running parts
    ///
    /// A change the running parts reject is rolled back.
    pub(crate) fn change_setting(&mut self, name: &str, text: &str) -> Result<()> {
        let previous = self.ctx.settings().get(name).cloned();
        self.ctx.set_setting(name, text)?;
        if let Err(e) = self.apply_setting(name) {
            if let Some(value) = previous {
                self.ctx.settings_mut().store(name, value);
            }
            return Err(e);
        }
        Ok(())
    }

    fn apply_setting(&mut self, name: &str) -> Result<()> {
        let settings = self.ctx.settings();
        match name {
            HEARTBEAT => {
                let hz = settings.int(HEARTBEAT) as f64;
                self.scheduler.heartbeat.set_frequency(hz);
            }
            FLUSHLOGS => {
                let flush = settings.flag(FLUSHLOGS);
                if let Some(writer) = &self.log_writer {
                    writer.set_flush_every_write(flush);
                }
            }
            LINK => {
                let index = settings.int(LINK).max(1) as usize - 1;
                self.ctx.links_mut().set_preferred(index)?;
                self.ctx.announce(format!("Primary link {}", index + 1));
            }
            TARGET_SYSTEM | TARGET_COMPONENT => {
                let (system, component) = (settings.byte(TARGET_SYSTEM), settings.byte(TARGET_COMPONENT));
                self.ctx.state_mut().set_target(system, component);
            }
            _ => {}
        }
        Ok(())
    }

    fn cmd_link(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => {
                let preferred = self.ctx.links().preferred();
                let mut lines = Vec::new();
                for (i, link) in self.ctx.links().masters().iter().enumerate() {
                    let stats = link.stats();
                    lines.push(format!(
                        "{}link {} {} {} ({} packets, {} lost, {:.1}% loss, {} bad)",
                        if i == preferred { "*" } else { " " },
                        i + 1,
                        link.label(),
                        health_label(link.health()),
                        stats.received,
                        stats.lost,
                        link.packet_loss(),
                        stats.bad_data
                    ));
                }
                let forwarded = &self.router.counters().forwarded;
                for (i, link) in self.ctx.links().outputs().iter().enumerate() {
                    lines.push(format!(
                        " out {} {} ({} forwarded, {} dropped)",
                        i + 1,
                        link.label(),
                        forwarded.get(i).copied().unwrap_or(0),
                        link.stats().dropped
                    ));
                }
                if lines.is_empty() {
                    lines.push("No links".to_string());
                }
                for line in lines {
                    self.ctx.console().writeln(line);
                }
                Ok(())
            }
            [sub, n] if sub == "set" => self.change_setting(LINK, n),
            _ => Err(usage("link <list|set N>")),
        }
    }

    fn cmd_watch(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => {
                let line = match self.router.watch() {
                    Some(pattern) => format!("Watching {}", pattern),
                    None => "Not watching".to_string(),
                };
                self.ctx.console().writeln(line);
            }
            [off] if off == "off" => {
                self.router.set_watch(None);
                self.ctx.console().writeln("Watch off");
            }
            [pattern] => {
                self.router.set_watch(Some(pattern.clone()));
                self.ctx.console().writeln(format!("Watching {}", pattern));
            }
            _ => return Err(usage("watch <PATTERN|off>")),
        }
        Ok(())
    }

    fn cmd_module(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => Err(usage("module <list|load|unload|reload> [MODULE]")),
            [sub] if sub == "list" => {
                let lines: Vec<String> = self
                    .modules
                    .loaded_names()
                    .into_iter()
                    .map(|name| {
                        let description = self.modules.description(&name).unwrap_or("");
                        format!("{}: {}", name, description)
                    })
                    .collect();
                for line in lines {
                    self.ctx.console().writeln(line);
                }
                Ok(())
            }
            [sub, name] => match sub.as_str() {
                "load" => self.modules.load(&mut self.ctx, name).map(|_| ()),
                "unload" => self.modules.unload(&mut self.ctx, name),
                "reload" => self.modules.reload(&mut self.ctx, name),
                _ => Err(usage("module <list|load|unload|reload> [MODULE]")),
            },
            _ => Err(usage("module <list|load|unload|reload> [MODULE]")),
        }
    }

    fn cmd_alias(&mut self, args: &[String]) -> Result<()> {
        match args {
            [] => self.list_aliases(),
            [sub] if sub == "list" => self.list_aliases(),
            [sub, name, expansion @ ..] if sub == "add" && !expansion.is_empty() => {
                if self.ctx.commands().lookup(name).is_some() {
                    return Err(ProxyError::Command(format!("'{}' is already a command", name)));
                }
                let expansion = expansion.join(" ");
                self.ctx.commands_mut().set_alias(name, &expansion);
                Ok(())
            }
            [sub, name] if sub == "remove" => {
                if self.ctx.commands_mut().remove_alias(name) {
                    Ok(())
                } else {
                    Err(ProxyError::Command(format!("No alias '{}'", name)))
                }
            }
            _ => Err(usage("alias <add NAME COMMAND|remove NAME|list>")),
        }
    }

    fn list_aliases(&mut self) -> Result<()> {
        let lines: Vec<String> = self
            .ctx
            .commands()
            .aliases()
            .map(|(name, expansion)| format!("{} -> {}", name, expansion))
            .collect();
        for line in lines {
            self.ctx.console().writeln(line);
        }
        Ok(())
    }

    fn cmd_reset(&mut self) -> Result<()> {
        self.ctx.state_mut().reset();
        for link in self.ctx.links_mut().masters_mut() {
            link.reset();
        }
        self.router.reset();
        self.ctx.console().writeln("Reset");
        Ok(())
    }
}
