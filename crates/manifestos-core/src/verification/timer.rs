//! Verification countdown.
//!
//! A [`VerificationTimer`] is a wall-clock countdown toward a deadline. It
//! has no internal thread: the owner calls [`VerificationTimer::tick`] once
//! per second with the current time. Remaining time is recomputed from the
//! clock on every tick, so a suspended host never drifts.
//!
//! ## Usage
//!
//! ```ignore
//! let mut timer = VerificationTimer::new(deadline, CountdownKind::Start, clock.now());
//! // Once per second:
//! if let Some(timeout) = timer.tick(clock.now()) {
//!     // fires exactly once
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Which verification window a countdown guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountdownKind {
    Start,
    Finish,
}

impl fmt::Display for CountdownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountdownKind::Start => f.write_str("start"),
            CountdownKind::Finish => f.write_str("finish"),
        }
    }
}

/// One-time timeout notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub kind: CountdownKind,
    pub deadline: DateTime<Utc>,
}

type TimeoutCallback = Box<dyn FnMut(Timeout)>;

/// Countdown toward a fixed deadline.
pub struct VerificationTimer {
    deadline: DateTime<Utc>,
    kind: CountdownKind,
    remaining_secs: u64,
    expired: bool,
    notified: bool,
    disposed: bool,
    on_timeout: Option<TimeoutCallback>,
}

impl VerificationTimer {
    pub fn new(deadline: DateTime<Utc>, kind: CountdownKind, now: DateTime<Utc>) -> Self {
        let remaining_secs = remaining_until(deadline, now);
        Self {
            deadline,
            kind,
            remaining_secs,
            expired: remaining_secs == 0,
            notified: false,
            disposed: false,
            on_timeout: None,
        }
    }

    /// Countdown of `secs` seconds starting at `now`.
    pub fn starting_at(now: DateTime<Utc>, secs: u64, kind: CountdownKind) -> Self {
        Self::new(now + window(secs), kind, now)
    }

    /// Attach a callback invoked together with the timeout notification.
    pub fn on_timeout(mut self, callback: impl FnMut(Timeout) + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn kind(&self) -> CountdownKind {
        self.kind
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Formatted remaining time for this countdown's kind.
    pub fn display(&self) -> String {
        format_remaining(self.kind, self.remaining_secs)
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Recompute remaining time. Returns the timeout the first time the
    /// countdown is observed at zero, and `None` on every other tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Timeout> {
        if self.disposed || self.notified {
            return None;
        }
        self.remaining_secs = remaining_until(self.deadline, now);
        if self.remaining_secs > 0 {
            return None;
        }
        self.expired = true;
        self.notified = true;
        let timeout = Timeout {
            kind: self.kind,
            deadline: self.deadline,
        };
        if let Some(callback) = self.on_timeout.as_mut() {
            callback(timeout);
        }
        Some(timeout)
    }

    /// Stop the countdown. No notification is produced afterwards.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.on_timeout = None;
    }
}

impl fmt::Debug for VerificationTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationTimer")
            .field("deadline", &self.deadline)
            .field("kind", &self.kind)
            .field("remaining_secs", &self.remaining_secs)
            .field("expired", &self.expired)
            .field("disposed", &self.disposed)
            .field("has_callback", &self.on_timeout.is_some())
            .finish()
    }
}

/// Longest accepted window: one year.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Window length as a duration, capped at [`MAX_WINDOW_SECS`].
pub fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Whole seconds left until `deadline`, floored and clamped at zero.
fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (deadline - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms / 1000) as u64
    }
}

/// Display text for a countdown.
///
/// Start windows read like a stopwatch (`01:05`); finish windows read as
/// `1m 5s`, or `5s` under a minute.
pub fn format_remaining(kind: CountdownKind, secs: u64) -> String {
    let (mins, secs) = (secs / 60, secs % 60);
    match kind {
        CountdownKind::Start => format!("{mins:02}:{secs:02}"),
        CountdownKind::Finish if mins > 0 => format!("{mins}m {secs}s"),
        CountdownKind::Finish => format!("{secs}s"),
    }
}

/// Time source for countdowns.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for simulations and tests. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}
