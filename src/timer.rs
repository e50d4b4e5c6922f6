//! Countdown timers serviced by the poll scheduler.
//!
//! Every timer in the control plane is a countdown that the scheduler
//! advances by the wall-clock delta of each tick. Values clamp at zero, so
//! a timer never fires early but may fire up to one tick late.

use std::time::Duration;

/// A one-shot countdown.
///
/// A disarmed timer ignores [`Countdown::advance`]. An armed timer reports
/// expiry exactly once, on the tick that brings it to zero, and disarms
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Countdown {
    remaining: Option<Duration>,
}

impl Countdown {
    /// A disarmed timer.
    pub const IDLE: Countdown = Countdown { remaining: None };

    /// A timer armed with `duration`.
    #[inline]
    pub fn armed(duration: Duration) -> Self {
        Countdown {
            remaining: Some(duration),
        }
    }

    /// (Re)load the timer.
    #[inline]
    pub fn arm(&mut self, duration: Duration) {
        self.remaining = Some(duration);
    }

    /// Reload only if idle or if `duration` would fire sooner.
    #[inline]
    pub fn arm_sooner(&mut self, duration: Duration) {
        match self.remaining {
            Some(left) if left <= duration => {}
            _ => self.remaining = Some(duration),
        }
    }

    #[inline]
    pub fn disarm(&mut self) {
        self.remaining = None;
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.remaining.is_some()
    }

    /// Time left, zero when idle.
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.remaining.unwrap_or(Duration::ZERO)
    }

    /// Advance by `elapsed`. Returns `true` on the expiring tick.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        match self.remaining {
            Some(left) => {
                let left = left.saturating_sub(elapsed);
                if left.is_zero() {
                    self.remaining = None;
                    true
                } else {
                    self.remaining = Some(left);
                    false
                }
            }
            None => false,
        }
    }
}
