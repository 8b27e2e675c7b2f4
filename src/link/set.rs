//! The proxy's masters and outputs, and the choice of primary master

use super::{Link, LinkHealth};
use crate::error::{ProxyError, Result};

/// All links, indexed from 0 in the order they were configured
#[derive(Debug, Default)]
pub struct LinkSet {
    masters: Vec<Link>,
    outputs: Vec<Link>,
    preferred: usize,
}

impl LinkSet {
    /// `preferred` is the 0-based index of the default master
    pub fn new(masters: Vec<Link>, outputs: Vec<Link>, preferred: usize) -> Self {
        Self {
            masters,
            outputs,
            preferred,
        }
    }

    pub fn masters(&self) -> &[Link] {
        &self.masters
    }

    pub fn masters_mut(&mut self) -> &mut [Link] {
        &mut self.masters
    }

    pub fn outputs(&self) -> &[Link] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [Link] {
        &mut self.outputs
    }

    pub fn master_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.masters.get_mut(index)
    }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.outputs.get_mut(index)
    }

    /// 0-based index of the configured default master
    pub fn preferred(&self) -> usize {
        self.preferred
    }

    /// Change the default master
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Command`] if there is no such master.
    pub fn set_preferred(&mut self, index: usize) -> Result<()> {
        if index >= self.masters.len() {
            return Err(ProxyError::Command(format!(
                "No link {} ({} configured)",
                index + 1,
                self.masters.len()
            )));
        }
        self.preferred = index;
        Ok(())
    }

    /// Index of the master commands are sent to
    ///
    /// The default master while it is not unhealthy, otherwise the first
    /// healthy one, otherwise the default master anyway.
    pub fn primary_index(&self) -> usize {
        let preferred = self.preferred.min(self.masters.len().saturating_sub(1));
        match self.masters.get(preferred) {
            Some(link) if link.health() != LinkHealth::Unhealthy => preferred,
            _ => self
                .masters
                .iter()
                .position(Link::is_healthy)
                .unwrap_or(preferred),
        }
    }

    /// The master commands are sent to; `None` only with no masters at all
    pub fn primary_mut(&mut self) -> Option<&mut Link> {
        let index = self.primary_index();
        self.masters.get_mut(index)
    }

    /// True when every master has been silent for longer than `timeout`
    pub fn all_masters_silent(&self, now: std::time::Instant, timeout: std::time::Duration) -> bool {
        !self.masters.is_empty()
            && self.masters.iter().all(|link| match link.last_message() {
                Some(at) => now.saturating_duration_since(at) > timeout,
                None => now.saturating_duration_since(link.opened_at()) > timeout,
            })
    }
}
