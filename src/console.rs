//! Operator console output
//!
//! Announcements (link state, mode changes, warnings) are printed, sent to
//! the tracing log and kept in a short history. Plain command output is
//! printed and kept, but not logged.

use std::collections::VecDeque;
use tracing::info;

/// Lines remembered when no other size is configured
pub const DEFAULT_HISTORY_LINES: usize = 100;

#[derive(Debug, Clone)]
pub struct Console {
    history: VecDeque<String>,
    capacity: usize,
    echo: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LINES)
    }
}

impl Console {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            echo: true,
        }
    }

    /// Console that only records (tests, scripted runs)
    pub fn quiet(capacity: usize) -> Self {
        Self {
            echo: false,
            ..Self::new(capacity)
        }
    }

    /// Operator-visible event
    pub fn announce(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.push(text);
    }

    /// Command output
    pub fn writeln(&mut self, text: impl Into<String>) {
        self.push(text.into());
    }

    fn push(&mut self, text: String) {
        if self.echo {
            println!("{}", text);
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(text);
    }

    /// Lines in the order they were written
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// How many history lines equal `text`
    pub fn count(&self, text: &str) -> usize {
        self.history.iter().filter(|l| *l == text).count()
    }

    pub fn last(&self) -> Option<&str> {
        self.history.back().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut console = Console::quiet(3);
        for i in 0..5 {
            console.writeln(format!("line {}", i));
        }
        let lines: Vec<_> = console.history().collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(console.last(), Some("line 4"));
    }

    #[test]
    fn test_count_matches_whole_lines() {
        let mut console = Console::quiet(10);
        console.announce("link 2 down");
        console.announce("link 2 OK");
        console.announce("link 2 down");
        assert_eq!(console.count("link 2 down"), 2);
        assert_eq!(console.count("link 2"), 0);
    }
}
