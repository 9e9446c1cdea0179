//! Keep-alive supervision
//!
//! A client that declares a keep-alive interval must send something at least
//! that often. The server tolerates one and a half intervals of silence
//! before giving up on the connection; an interval of zero turns supervision
//! off.
//!
//! Time is read through [`Clock`] so the endpoint can be driven by a manual
//! clock in tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[cfg(test)]
mod tests;

/// Source of the current instant
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock backed by the tokio timer
///
/// Reading through tokio means a paused runtime (`start_paused`) also pauses
/// the endpoint's notion of time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Allowed silence for a keep-alive interval: 1.5x, or `None` when disabled
pub fn expiry_for(keep_alive: u16) -> Option<Duration> {
    if keep_alive == 0 {
        None
    } else {
        Some(Duration::from_millis(keep_alive as u64 * 1500))
    }
}

/// Inactivity supervisor for one connection
#[derive(Debug, Clone)]
pub struct KeepAliveMonitor {
    keep_alive: u16,
    expiry: Option<Duration>,
    last_activity: Instant,
    expired: bool,
}

impl KeepAliveMonitor {
    /// Start supervising with the negotiated interval in seconds
    pub fn new(keep_alive: u16, now: Instant) -> Self {
        Self {
            keep_alive,
            expiry: expiry_for(keep_alive),
            last_activity: now,
            expired: false,
        }
    }

    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn is_enabled(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record inbound activity
    pub fn touch(&mut self, now: Instant) {
        if !self.expired {
            self.last_activity = now;
        }
    }

    /// When the connection expires unless more traffic arrives
    ///
    /// `None` once expiry has been reported, or when supervision is off.
    pub fn deadline(&self) -> Option<Instant> {
        if self.expired {
            return None;
        }
        self.expiry.map(|expiry| self.last_activity + expiry)
    }

    /// Check for expiry; returns `true` exactly once
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.expired = true;
                true
            }
            _ => false,
        }
    }
}
