//! Command table, aliases and tab completion

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ProxyError, Result};

/// How one argument position of a command completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionRule {
    /// `(MODULE)`
    Module,
    /// `(SETTING)`
    Setting,
    /// `(FILENAME)`
    Filename,
    /// `(ALIAS)`
    Alias,
    /// `<a|b|c>` or a bare word
    Choices(Vec<String>),
}

impl CompletionRule {
    pub fn parse(rule: &str) -> Self {
        match rule {
            "(MODULE)" => Self::Module,
            "(SETTING)" => Self::Setting,
            "(FILENAME)" => Self::Filename,
            "(ALIAS)" => Self::Alias,
            _ => {
                let inner = rule
                    .strip_prefix('<')
                    .and_then(|r| r.strip_suffix('>'))
                    .unwrap_or(rule);
                Self::Choices(inner.split('|').map(str::to_string).collect())
            }
        }
    }
}

/// A registered command
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub name: String,
    /// Module that registered it; `None` for built-ins
    pub owner: Option<String>,
    pub help: String,
    pub completions: Vec<CompletionRule>,
}

/// Names the completer needs from outside the table
#[derive(Debug, Clone, Default)]
pub struct CompletionSources {
    pub modules: Vec<String>,
    pub settings: Vec<String>,
}

/// Every command the operator can type, plus aliases
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: BTreeMap<String, CommandEntry>,
    aliases: BTreeMap<String, String>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command answered by the proxy itself
    pub fn register_builtin(&mut self, name: &str, help: &str, completions: &[&str]) {
        self.entries.insert(
            name.to_string(),
            CommandEntry {
                name: name.to_string(),
                owner: None,
                help: help.to_string(),
                completions: completions.iter().map(|r| CompletionRule::parse(r)).collect(),
            },
        );
    }

    /// Register a command handled by module `owner`
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Module`] if the name belongs to a built-in or
    /// another module.
    pub fn register(&mut self, owner: &str, name: &str, help: &str) -> Result<()> {
        if let Some(existing) = self.entries.get(name) {
            if existing.owner.as_deref() != Some(owner) {
                return Err(ProxyError::module(
                    owner,
                    format!(
                        "command '{}' already provided by {}",
                        name,
                        existing.owner.as_deref().unwrap_or("the proxy")
                    ),
                ));
            }
        }
        self.entries.insert(
            name.to_string(),
            CommandEntry {
                name: name.to_string(),
                owner: Some(owner.to_string()),
                help: help.to_string(),
                completions: Vec::new(),
            },
        );
        Ok(())
    }

    /// Set the argument completion rules of `name`
    pub fn set_completions(&mut self, name: &str, rules: &[&str]) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ProxyError::Command(format!("No command '{}' to complete", name)))?;
        entry.completions = rules.iter().map(|r| CompletionRule::parse(r)).collect();
        Ok(())
    }

    /// Drop every command registered by `owner`; returns how many
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.owner.as_deref() != Some(owner));
        before - self.entries.len()
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Commands in name order
    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.values()
    }

    pub fn set_alias(&mut self, name: &str, expansion: &str) {
        self.aliases.insert(name.to_string(), expansion.to_string());
    }

    pub fn remove_alias(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&String, &String)> {
        self.aliases.iter()
    }

    /// Replace a leading alias with its expansion (one level)
    pub fn expand_alias(&self, args: Vec<String>) -> Vec<String> {
        match args.first().and_then(|first| self.aliases.get(first)) {
            Some(expansion) => expansion
                .split_whitespace()
                .map(str::to_string)
                .chain(args.into_iter().skip(1))
                .collect(),
            None => args,
        }
    }

    /// Candidates for the last word of `line`
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_proxy::module::commands::{CommandTable, CompletionSources};
    ///
    /// let mut table = CommandTable::new();
    /// table.register_builtin("module", "module control", &["<list|load|unload|reload>", "(MODULE)"]);
    /// let sources = CompletionSources { modules: vec!["wp".into()], settings: vec![] };
    /// assert_eq!(table.complete("module lo", &sources), vec!["load"]);
    /// assert_eq!(table.complete("module load ", &sources), vec!["wp"]);
    /// ```
    pub fn complete(&self, line: &str, sources: &CompletionSources) -> Vec<String> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        let prefix = if line.is_empty() || line.ends_with(char::is_whitespace) {
            ""
        } else {
            words.pop().unwrap_or("")
        };

        let mut candidates: Vec<String> = match words.first() {
            None => self
                .entries
                .keys()
                .chain(self.aliases.keys())
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect(),
            Some(command) => {
                let rule = self
                    .entries
                    .get(*command)
                    .and_then(|e| e.completions.get(words.len() - 1));
                match rule {
                    Some(CompletionRule::Module) => filter(&sources.modules, prefix),
                    Some(CompletionRule::Setting) => filter(&sources.settings, prefix),
                    Some(CompletionRule::Alias) => self
                        .aliases
                        .keys()
                        .filter(|a| a.starts_with(prefix))
                        .cloned()
                        .collect(),
                    Some(CompletionRule::Choices(choices)) => filter(choices, prefix),
                    Some(CompletionRule::Filename) => complete_filename(prefix),
                    None => Vec::new(),
                }
            }
        };

        candidates.sort();
        candidates.dedup();
        candidates
    }
}

fn filter(options: &[String], prefix: &str) -> Vec<String> {
    options.iter().filter(|o| o.starts_with(prefix)).cloned().collect()
}

fn complete_filename(prefix: &str) -> Vec<String> {
    let (dir, stem) = match prefix.rfind('/') {
        Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
        None => ("", prefix),
    };
    let search = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
    let Ok(entries) = fs::read_dir(search) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(stem) {
                return None;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some(format!("{}{}{}", dir, name, if is_dir { "/" } else { "" }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table() -> CommandTable {
        let mut table = CommandTable::new();
        table.register_builtin("set", "settings", &["(SETTING)"]);
        table.register_builtin("script", "run a script", &["(FILENAME)"]);
        table.register_builtin("alias", "aliases", &["<add|remove|list>", "(ALIAS)"]);
        table
    }

    #[test]
    fn test_parse_rules() {
        assert_eq!(CompletionRule::parse("(MODULE)"), CompletionRule::Module);
        assert_eq!(
            CompletionRule::parse("<list|load>"),
            CompletionRule::Choices(vec!["list".into(), "load".into()])
        );
        assert_eq!(CompletionRule::parse("status"), CompletionRule::Choices(vec!["status".into()]));
    }

    #[test]
    fn test_module_commands_cannot_shadow_builtins() {
        let mut table = table();
        assert!(matches!(table.register("wp", "set", ""), Err(ProxyError::Module { .. })));
        table.register("wp", "wp", "waypoints").unwrap();
        assert!(table.register("fence", "wp", "").is_err());
        // Re-registering your own command is fine
        table.register("wp", "wp", "waypoints").unwrap();
    }

    #[test]
    fn test_remove_owner() {
        let mut table = table();
        table.register("wp", "wp", "").unwrap();
        table.register("wp", "wpedit", "").unwrap();
        let before = table.len();
        assert_eq!(table.remove_owner("wp"), 2);
        assert_eq!(table.len(), before - 2);
        assert!(table.lookup("set").is_some());
    }

    #[test]
    fn test_alias_expansion() {
        let mut table = table();
        table.set_alias("g", "mode GUIDED");
        let args = vec!["g".to_string(), "now".to_string()];
        assert_eq!(table.expand_alias(args), vec!["mode", "GUIDED", "now"]);

        let args = vec!["set".to_string()];
        assert_eq!(table.expand_alias(args), vec!["set"]);
        assert!(table.remove_alias("g"));
        assert!(!table.remove_alias("g"));
    }

    #[test]
    fn test_complete_command_names_and_aliases() {
        let mut table = table();
        table.set_alias("sethome", "wp sethome");
        let sources = CompletionSources::default();
        assert_eq!(table.complete("se", &sources), vec!["set", "sethome"]);
        assert_eq!(table.complete("", &sources).len(), 4);
    }

    #[test]
    fn test_complete_settings_and_choices() {
        let table = table();
        let sources = CompletionSources {
            modules: vec![],
            settings: vec!["streamrate".into(), "streamrate2".into(), "heartbeat".into()],
        };
        assert_eq!(table.complete("set str", &sources), vec!["streamrate", "streamrate2"]);
        assert_eq!(table.complete("alias r", &sources), vec!["remove"]);
        assert!(table.complete("set streamrate ", &sources).is_empty());
    }

    #[test]
    fn test_complete_filenames() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("mission.txt"), "").unwrap();
        fs::create_dir(tmp.path().join("missions")).unwrap();
        fs::write(tmp.path().join("fence.txt"), "").unwrap();

        let prefix = format!("{}/mis", tmp.path().display());
        let found = table().complete(&format!("script {}", prefix), &CompletionSources::default());
        let base = tmp.path().display().to_string();
        assert_eq!(
            found,
            vec![format!("{}/mission.txt", base), format!("{}/missions/", base)]
        );
    }
}
