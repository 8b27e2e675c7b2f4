//! # Periodic Scheduler
//!
//! Frequency-gated triggers polled from the event loop. Nothing here owns
//! a timer or a thread: each iteration asks "is it time yet?" and acts on
//! the answer.

use std::time::{Duration, Instant};

/// Fires at most once per period
///
/// A frequency of zero disables the event.
///
/// # Examples
///
/// ```
/// use mav_proxy::periodic::PeriodicEvent;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let mut event = PeriodicEvent::starting_at(2.0, start);
/// assert!(!event.trigger(start + Duration::from_millis(100)));
/// assert!(event.trigger(start + Duration::from_millis(500)));
/// assert!(!event.trigger(start + Duration::from_millis(600)));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PeriodicEvent {
    frequency: f64,
    last_fire: Option<Instant>,
}

impl PeriodicEvent {
    /// Event whose first period starts now
    pub fn new(frequency: f64) -> Self {
        Self::starting_at(frequency, Instant::now())
    }

    /// Event whose first period starts at `start`
    pub fn starting_at(frequency: f64, start: Instant) -> Self {
        Self {
            frequency,
            last_fire: Some(start),
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Change the rate; the current period keeps its start time
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Make the next [`trigger`](Self::trigger) fire regardless of timing
    pub fn force(&mut self) {
        self.last_fire = None;
    }

    fn period(&self) -> Option<Duration> {
        if self.frequency > 0.0 && self.frequency.is_finite() {
            Some(Duration::from_secs_f64(1.0 / self.frequency))
        } else {
            None
        }
    }

    /// True (and restarts the period) if a full period has passed
    pub fn trigger(&mut self, now: Instant) -> bool {
        let Some(period) = self.period() else {
            return false;
        };
        let due = match self.last_fire {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= period,
        };
        if due {
            self.last_fire = Some(now);
        }
        due
    }
}

/// Which scheduled jobs are due this iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueJobs {
    pub heartbeat: bool,
    pub stream_rate: bool,
    pub link_check: bool,
}

/// Default link-health check rate (every 3 seconds)
pub const LINK_CHECK_HZ: f64 = 0.33;

/// Default stream-rate re-request rate
pub const STREAM_RATE_CHECK_HZ: f64 = 1.0;

/// The proxy's independent periodic jobs
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub heartbeat: PeriodicEvent,
    pub stream_rate: PeriodicEvent,
    pub link_check: PeriodicEvent,
}

impl Scheduler {
    /// Scheduler with the given heartbeat rate (0 disables heartbeats)
    pub fn new(heartbeat_hz: f64, now: Instant) -> Self {
        Self {
            heartbeat: PeriodicEvent::starting_at(heartbeat_hz, now),
            stream_rate: PeriodicEvent::starting_at(STREAM_RATE_CHECK_HZ, now),
            link_check: PeriodicEvent::starting_at(LINK_CHECK_HZ, now),
        }
    }

    /// Check every job once
    pub fn poll(&mut self, now: Instant) -> DueJobs {
        DueJobs {
            heartbeat: self.heartbeat.trigger(now),
            stream_rate: self.stream_rate.trigger(now),
            link_check: self.link_check.trigger(now),
        }
    }
}

/// Remembers the last stream rate requested per link so identical
/// requests are not repeated
#[derive(Debug, Clone, Default)]
pub struct StreamRateLatch {
    sent: Vec<Option<(i32, u8)>>,
}

impl StreamRateLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `rate` for `link` (towards `target_system`) differs from the
    /// last request; records it as sent
    ///
    /// Negative rates mean "leave the vehicle's rates alone" and never fire.
    pub fn should_send(&mut self, link: usize, rate: i32, target_system: u8) -> bool {
        if rate < 0 {
            return false;
        }
        if self.sent.len() <= link {
            self.sent.resize(link + 1, None);
        }
        let wanted = Some((rate, target_system));
        if self.sent[link] == wanted {
            return false;
        }
        self.sent[link] = wanted;
        true
    }

    /// Forget what was sent on `link`, so its next trigger resends
    pub fn forget(&mut self, link: usize) {
        if let Some(sent) = self.sent.get_mut(link) {
            *sent = None;
        }
    }

    /// Forget everything sent, so the next trigger resends
    pub fn clear(&mut self) {
        self.sent.clear();
    }
}
