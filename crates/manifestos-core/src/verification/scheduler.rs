//! Single tick source for every active countdown.
//!
//! Sessions are keyed by `(task_id, kind)`, so a task has at most one start
//! and one finish countdown at any time. One call to
//! [`CountdownScheduler::tick`] advances all of them.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use super::timer::{CountdownKind, VerificationTimer};

/// A countdown session that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownExpired {
    pub task_id: String,
    pub kind: CountdownKind,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CountdownScheduler {
    sessions: BTreeMap<(String, CountdownKind), VerificationTimer>,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a countdown. Returns `false` and leaves the running session
    /// untouched when one is already mounted for the same key.
    pub fn mount(
        &mut self,
        task_id: &str,
        kind: CountdownKind,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let key = (task_id.to_string(), kind);
        if self.sessions.contains_key(&key) {
            return false;
        }
        debug!(task_id, %kind, %deadline, "countdown mounted");
        self.sessions
            .insert(key, VerificationTimer::new(deadline, kind, now));
        true
    }

    /// Stop and drop one session. Returns whether it existed.
    pub fn dispose(&mut self, task_id: &str, kind: CountdownKind) -> bool {
        match self.sessions.remove(&(task_id.to_string(), kind)) {
            Some(mut timer) => {
                timer.dispose();
                debug!(task_id, %kind, "countdown disposed");
                true
            }
            None => false,
        }
    }

    /// Stop every session of a task.
    pub fn dispose_task(&mut self, task_id: &str) {
        self.dispose(task_id, CountdownKind::Start);
        self.dispose(task_id, CountdownKind::Finish);
    }

    pub fn get(&self, task_id: &str, kind: CountdownKind) -> Option<&VerificationTimer> {
        self.sessions.get(&(task_id.to_string(), kind))
    }

    pub fn is_mounted(&self, task_id: &str, kind: CountdownKind) -> bool {
        self.get(task_id, kind).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Advance every session. Expired sessions are reported once and removed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<CountdownExpired> {
        let mut expired = Vec::new();
        for ((task_id, kind), timer) in self.sessions.iter_mut() {
            if let Some(timeout) = timer.tick(now) {
                expired.push(CountdownExpired {
                    task_id: task_id.clone(),
                    kind: *kind,
                    deadline: timeout.deadline,
                });
            }
        }
        for e in &expired {
            self.sessions.remove(&(e.task_id.clone(), e.kind));
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap()
    }

    #[test]
    fn remount_is_a_noop() {
        let mut scheduler = CountdownScheduler::new();
        assert!(scheduler.mount("a", CountdownKind::Start, t0() + Duration::seconds(120), t0()));
        assert!(!scheduler.mount("a", CountdownKind::Start, t0() + Duration::seconds(5), t0()));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(
            scheduler.get("a", CountdownKind::Start).map(|t| t.remaining_secs()),
            Some(120)
        );
    }

    #[test]
    fn one_tick_fans_out_to_all_sessions() {
        let mut scheduler = CountdownScheduler::new();
        scheduler.mount("a", CountdownKind::Start, t0() + Duration::seconds(2), t0());
        scheduler.mount("b", CountdownKind::Finish, t0() + Duration::seconds(3), t0());

        assert!(scheduler.tick(t0() + Duration::seconds(1)).is_empty());
        let fired = scheduler.tick(t0() + Duration::seconds(2));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].task_id, "a");
        assert!(!scheduler.is_mounted("a", CountdownKind::Start));

        let fired = scheduler.tick(t0() + Duration::seconds(10));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, CountdownKind::Finish);
        assert!(scheduler.tick(t0() + Duration::seconds(11)).is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn disposed_task_produces_no_expiry() {
        let mut scheduler = CountdownScheduler::new();
        scheduler.mount("a", CountdownKind::Start, t0() + Duration::seconds(2), t0());
        scheduler.mount("a", CountdownKind::Finish, t0() + Duration::seconds(2), t0());
        scheduler.dispose_task("a");
        assert!(scheduler.tick(t0() + Duration::seconds(200)).is_empty());
        assert!(!scheduler.dispose("a", CountdownKind::Start));
    }
}
