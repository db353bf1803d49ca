//! Owner of every task's verification state.
//!
//! [`VerificationStore`] is the only writer of [`TaskVerificationState`].
//! The owner calls [`VerificationStore::tick`] once per second. A tick
//!
//! 1. applies `verification-result` signals in arrival order,
//! 2. advances every countdown through one shared scheduler,
//! 3. evaluates each task against the clock.
//!
//! Nothing in here awaits, so a tick applies each task's transitions
//! without interleaving.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::bus::{
    FailureReason, Signal, SignalBus, VerificationDismissal, VerificationRequest, VerificationResult,
};
use super::scheduler::{CountdownExpired, CountdownScheduler};
use super::state::{
    TaskVerificationState, Transition, VerificationPolicy, VerificationStatus, VerificationType,
};
use super::timer::{window, CountdownKind, VerificationTimer};
use crate::error::{CoreError, Result, TransitionError};
use crate::events::Event;
use crate::reward::{GoldBalance, RewardCalculator, RewardRecord};
use crate::task::{Task, TaskStore, TaskUpdate};

pub struct VerificationStore<G, T> {
    states: BTreeMap<String, TaskVerificationState>,
    scheduler: CountdownScheduler,
    policy: VerificationPolicy,
    calculator: RewardCalculator,
    bus: SignalBus,
    results: broadcast::Receiver<Signal>,
    gold: G,
    tasks: T,
    /// Tasks whose completion reward has been credited.
    rewarded: HashSet<String>,
    /// Completion quality ratings waiting to be applied.
    quality: HashMap<String, u8>,
}

impl<G: GoldBalance, T: TaskStore> VerificationStore<G, T> {
    pub fn new(
        policy: VerificationPolicy,
        calculator: RewardCalculator,
        bus: SignalBus,
        gold: G,
        tasks: T,
    ) -> Self {
        let results = bus.subscribe();
        Self {
            states: BTreeMap::new(),
            scheduler: CountdownScheduler::new(),
            policy,
            calculator,
            bus,
            results,
            gold,
            tasks,
            rewarded: HashSet::new(),
            quality: HashMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self, task_id: &str) -> Option<&TaskVerificationState> {
        self.states.get(task_id)
    }

    pub fn states(&self) -> impl Iterator<Item = &TaskVerificationState> {
        self.states.values()
    }

    pub fn countdown(&self, task_id: &str, kind: CountdownKind) -> Option<&VerificationTimer> {
        self.scheduler.get(task_id, kind)
    }

    pub fn active_countdowns(&self) -> usize {
        self.scheduler.len()
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn gold(&self) -> &G {
        &self.gold
    }

    pub fn tasks(&self) -> &T {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut T {
        &mut self.tasks
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Enable verification for a task. A cancelled verification is reset
    /// to `Pending`; any other existing state is left alone.
    pub fn enable(&mut self, task_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>> {
        if let Some(status) = self.states.get(task_id).map(|s| s.status()) {
            if status == VerificationStatus::Cancelled {
                return self.step(task_id, |_, state, _, _| state.re_enable(now));
            }
            debug!(task_id, %status, "verification already enabled");
            return Ok(Vec::new());
        }

        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        task.validate()?;
        let state = TaskVerificationState::for_task(&task)?;
        self.states.insert(task_id.to_string(), state);
        info!(task_id, "verification enabled");
        Ok(vec![Event::VerificationEnabled {
            task_id: task_id.to_string(),
            at: now,
        }])
    }

    /// Explicit user cancellation.
    pub fn cancel(&mut self, task_id: &str, reason: &str, now: DateTime<Utc>) -> Result<Vec<Event>> {
        self.step(task_id, |_, state, _, _| state.cancel(now, reason))
    }

    /// The user reports the task finished before its scheduled end.
    pub fn request_completion(&mut self, task_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>> {
        self.step(task_id, |_, state, _, _| state.request_completion(now))
    }

    /// Record a 1-5 quality rating applied when the completion is verified.
    pub fn rate_completion(&mut self, task_id: &str, quality: u8) -> Result<()> {
        if !self.states.contains_key(task_id) {
            return Err(TransitionError::UnknownTask(task_id.to_string()).into());
        }
        self.quality.insert(task_id.to_string(), quality.clamp(1, 5));
        Ok(())
    }

    /// Forget a task, stopping its countdowns and withdrawing its modals.
    /// Returns whether it was tracked.
    pub fn remove_task(&mut self, task_id: &str) -> bool {
        self.scheduler.dispose_task(task_id);
        self.quality.remove(task_id);
        let removed = self.states.remove(task_id).is_some();
        if removed {
            info!(task_id, "verification removed");
            self.dismiss_ui(VerificationDismissal::task(task_id));
        }
        removed
    }

    // ── Tick ─────────────────────────────────────────────────────────

    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();

        loop {
            match self.results.try_recv() {
                Ok(Signal::VerificationResult(result)) => {
                    self.apply_result(result, now, &mut events)
                }
                Ok(Signal::RequestVerificationUi(_) | Signal::DismissVerificationUi(_)) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "verification results dropped by slow receiver");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        for expired in self.scheduler.tick(now) {
            self.apply_expiry(expired, now, &mut events);
        }

        let ids: Vec<String> = self.states.keys().cloned().collect();
        for id in ids {
            let Some(task) = self.tasks.get(&id) else {
                warn!(task_id = %id, "task no longer exists, dropping verification");
                self.remove_task(&id);
                continue;
            };
            let Some(mut state) = self.states.remove(&id) else {
                continue;
            };
            if let Some(transition) = state.evaluate(&task, now, &self.policy) {
                self.on_transition(&mut state, &task, transition, &mut events);
            }
            self.states.insert(id, state);
        }

        events
    }

    fn apply_result(&mut self, result: VerificationResult, now: DateTime<Utc>, events: &mut Vec<Event>) {
        debug!(
            task_id = %result.task_id,
            verification_type = %result.verification_type,
            success = result.success,
            "verification result received"
        );
        let task_id = result.task_id.clone();
        let outcome = self.step_into(&task_id, events, |store, state, task, events| {
            let expected: &[VerificationStatus] = match result.verification_type {
                VerificationType::Start => &[
                    VerificationStatus::WaitingStart,
                    VerificationStatus::VerifyingStart,
                ],
                VerificationType::Complete => &[VerificationStatus::VerifyingComplete],
            };
            if !expected.contains(&state.status()) {
                return Err(TransitionError::UnexpectedResult {
                    task_id: task.id.clone(),
                    verification_type: result.verification_type,
                    status: state.status(),
                });
            }

            match (result.verification_type, result.success, &result.reason) {
                (VerificationType::Start, true, _) => state.start_verified(now),
                (VerificationType::Complete, true, _) => {
                    let quality = store.quality.remove(&task.id);
                    let record = store
                        .calculator
                        .reward_record(task, quality, state.start_timed_out());
                    let transition = state.completion_verified(now, record.final_gold)?;
                    store.credit_reward(task, record, now, events);
                    Ok(transition)
                }
                (VerificationType::Start, false, Some(FailureReason::Timeout)) => {
                    state.start_window_expired(now)
                }
                (VerificationType::Complete, false, Some(FailureReason::Timeout)) => {
                    state.completion_window_expired(now)
                }
                (_, false, Some(FailureReason::Rejected { message, attempts })) => {
                    state.fail(now, *attempts, message.as_str())
                }
                (_, false, Some(FailureReason::Cancelled) | None) => state.cancel(now, "cancelled"),
            }
        });
        if let Err(e) = outcome {
            warn!(task_id = %task_id, error = %e, "verification result ignored");
        }
    }

    fn apply_expiry(&mut self, expired: CountdownExpired, now: DateTime<Utc>, events: &mut Vec<Event>) {
        events.push(Event::CountdownExpired {
            task_id: expired.task_id.clone(),
            kind: expired.kind,
            at: now,
        });
        let kind = expired.kind;
        let outcome = self.step_into(&expired.task_id, events, |_, state, _, _| {
            match (kind, state.status()) {
                (
                    CountdownKind::Start,
                    VerificationStatus::WaitingStart | VerificationStatus::VerifyingStart,
                ) => state.start_window_expired(now),
                (CountdownKind::Finish, VerificationStatus::Started | VerificationStatus::InProgress) => {
                    state.request_completion(now)
                }
                (CountdownKind::Finish, VerificationStatus::VerifyingComplete) => {
                    state.completion_window_expired(now)
                }
                (_, status) => Err(TransitionError::InvalidTransition {
                    from: status,
                    action: "expire countdown",
                }),
            }
        });
        if let Err(e) = outcome {
            debug!(task_id = %expired.task_id, error = %e, "countdown expiry ignored");
        }
    }

    fn step<F>(&mut self, task_id: &str, f: F) -> Result<Vec<Event>>
    where
        F: FnOnce(&mut Self, &mut TaskVerificationState, &Task, &mut Vec<Event>) -> Result<Transition, TransitionError>,
    {
        let mut events = Vec::new();
        self.step_into(task_id, &mut events, f)?;
        Ok(events)
    }

    /// Run one state request with the state taken out of the map, then
    /// apply the effects of the resulting transition.
    fn step_into<F>(&mut self, task_id: &str, events: &mut Vec<Event>, f: F) -> Result<Transition>
    where
        F: FnOnce(&mut Self, &mut TaskVerificationState, &Task, &mut Vec<Event>) -> Result<Transition, TransitionError>,
    {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        let mut state = self
            .states
            .remove(task_id)
            .ok_or_else(|| TransitionError::UnknownTask(task_id.to_string()))?;

        let outcome = f(self, &mut state, &task, events);
        if let Ok(transition) = outcome {
            self.on_transition(&mut state, &task, transition, events);
        }
        self.states.insert(task_id.to_string(), state);
        Ok(outcome?)
    }

    /// Effects of entering a state: countdowns, UI requests, task updates.
    fn on_transition(
        &mut self,
        state: &mut TaskVerificationState,
        task: &Task,
        transition: Transition,
        events: &mut Vec<Event>,
    ) {
        let task_id = task.id.as_str();
        let at = transition.at;
        info!(task_id, from = %transition.from, to = %transition.to, "verification transition");
        events.push(Event::VerificationTransition {
            task_id: task_id.to_string(),
            from: transition.from,
            to: transition.to,
            at,
        });

        let mut update = TaskUpdate::status(transition.to.task_status());
        match transition.to {
            VerificationStatus::WaitingStart => {
                let deadline = at + window(self.policy.start_window_secs);
                self.mount(task_id, CountdownKind::Start, deadline, at, events);
                self.request_ui(state, task, VerificationType::Start, deadline, events);
                match state.request_start_verification(at) {
                    Ok(next) => self.on_transition(state, task, next, events),
                    Err(e) => warn!(task_id, error = %e, "start verification not requested"),
                }
                return;
            }
            VerificationStatus::Started => {
                self.scheduler.dispose(task_id, CountdownKind::Start);
                self.dismiss_ui(VerificationDismissal::step(task_id, VerificationType::Start));
                let started = state.actual_start_time().unwrap_or(at);
                let deadline = task
                    .scheduled_end
                    .unwrap_or_else(|| started + Duration::minutes(i64::from(task.duration_minutes)));
                self.mount(task_id, CountdownKind::Finish, deadline, at, events);
                update.actual_start = Some(started);
            }
            VerificationStatus::VerifyingComplete => {
                self.scheduler.dispose(task_id, CountdownKind::Finish);
                let deadline = at + window(self.policy.completion_window_secs);
                self.mount(task_id, CountdownKind::Finish, deadline, at, events);
                self.request_ui(state, task, VerificationType::Complete, deadline, events);
            }
            VerificationStatus::Completed => {
                self.scheduler.dispose_task(task_id);
                self.dismiss_ui(VerificationDismissal::task(task_id));
                if state.completion_timed_out() {
                    info!(task_id, "completion window elapsed, no reward");
                    events.push(Event::RewardWithheld {
                        task_id: task_id.to_string(),
                        reason: "completion window elapsed".into(),
                        at,
                    });
                }
                update.is_completed = Some(true);
                update.end_time = Some(at);
                update.gold_earned = Some(state.gold_earned());
            }
            VerificationStatus::Failed => {
                self.scheduler.dispose_task(task_id);
                self.dismiss_ui(VerificationDismissal::task(task_id));
                let reason = state.failure_reason().unwrap_or("evidence rejected").to_string();
                events.push(Event::VerificationFailed {
                    task_id: task_id.to_string(),
                    reason: reason.clone(),
                    at,
                });
                update.verification_note = Some(reason);
            }
            VerificationStatus::Cancelled => {
                self.scheduler.dispose_task(task_id);
                self.dismiss_ui(VerificationDismissal::task(task_id));
                let reason = state.failure_reason().unwrap_or("cancelled").to_string();
                events.push(Event::VerificationCancelled {
                    task_id: task_id.to_string(),
                    reason: reason.clone(),
                    at,
                });
                update.verification_note = Some(reason);
            }
            VerificationStatus::Pending
            | VerificationStatus::VerifyingStart
            | VerificationStatus::InProgress => {}
        }

        if let Err(e) = self.tasks.update_task(task_id, update) {
            warn!(task_id, error = %e, "task store update failed");
        }
    }

    fn mount(
        &mut self,
        task_id: &str,
        kind: CountdownKind,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        if self.scheduler.mount(task_id, kind, deadline, now) {
            events.push(Event::CountdownMounted {
                task_id: task_id.to_string(),
                kind,
                deadline,
            });
        }
    }

    fn request_ui(
        &self,
        state: &TaskVerificationState,
        task: &Task,
        verification_type: VerificationType,
        deadline: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let keywords = state.keywords(verification_type).to_vec();
        let (timeout_secs, what) = match verification_type {
            VerificationType::Start => (self.policy.start_window_secs, "starting"),
            VerificationType::Complete => (self.policy.completion_window_secs, "finishing"),
        };
        let request = VerificationRequest {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            verification_type,
            requirement: format!("Show that you are {what} \"{}\": {}", task.title, keywords.join(", ")),
            keywords,
            timeout_secs,
            deadline,
        };
        let receivers = self.bus.publish(Signal::RequestVerificationUi(request));
        debug!(task_id = %task.id, %verification_type, receivers, "verification UI requested");
        events.push(Event::VerificationRequested {
            task_id: task.id.clone(),
            verification_type,
            deadline,
        });
    }

    fn dismiss_ui(&self, dismissal: VerificationDismissal) {
        let task_id = dismissal.task_id.clone();
        let receivers = self.bus.publish(Signal::DismissVerificationUi(dismissal));
        debug!(task_id = %task_id, receivers, "verification UI dismissed");
    }

    /// Credit a completion reward at most once per task.
    fn credit_reward(&mut self, task: &Task, record: RewardRecord, at: DateTime<Utc>, events: &mut Vec<Event>) {
        if record.final_gold <= 0 {
            events.push(Event::RewardWithheld {
                task_id: task.id.clone(),
                reason: "no gold earned".into(),
                at,
            });
            return;
        }
        if !self.rewarded.insert(task.id.clone()) {
            warn!(task_id = %task.id, "completion reward already credited");
            return;
        }
        let reason = format!("completed: {}", task.title);
        match self
            .gold
            .credit(record.final_gold, &reason, Some((&task.id, &task.title)), at)
        {
            Ok(()) => {
                info!(task_id = %task.id, amount = record.final_gold, "gold awarded");
                events.push(Event::GoldAwarded {
                    task_id: task.id.clone(),
                    record,
                    at,
                });
            }
            Err(e) => {
                self.rewarded.remove(&task.id);
                warn!(task_id = %task.id, error = %e, "gold credit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::GoldLedger;
    use crate::task::{MemoryTaskStore, TaskStatus};
    use chrono::TimeZone;

    type Store = VerificationStore<GoldLedger, MemoryTaskStore>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap()
    }

    fn store_with(task: Task) -> Store {
        let tasks: MemoryTaskStore = [task].into_iter().collect();
        VerificationStore::new(
            VerificationPolicy::default(),
            RewardCalculator::default(),
            SignalBus::default(),
            GoldLedger::default(),
            tasks,
        )
    }

    fn run_task() -> Task {
        Task::new("run", "Morning run", 30)
            .scheduled_at(t0())
            .with_verification(["shoes"], ["sweat"])
    }

    fn publish(store: &Store, verification_type: VerificationType, success: bool, reason: Option<FailureReason>) {
        store.bus().publish(Signal::VerificationResult(VerificationResult {
            task_id: "run".into(),
            verification_type,
            success,
            evidence: None,
            reason,
        }));
    }

    #[test]
    fn enable_requires_known_task_with_keywords() {
        let mut store = store_with(Task::new("plain", "No checks", 30));
        assert!(matches!(store.enable("missing", t0()), Err(CoreError::TaskNotFound(_))));
        assert!(matches!(store.enable("plain", t0()), Err(CoreError::Validation(_))));
    }

    #[test]
    fn reaching_start_requests_ui_and_mounts_countdown() {
        let mut store = store_with(run_task());
        let mut ui = store.bus().subscribe();
        store.enable("run", t0()).unwrap();

        let events = store.tick(t0());
        assert_eq!(store.state("run").unwrap().status(), VerificationStatus::VerifyingStart);
        assert!(store.countdown("run", CountdownKind::Start).is_some());
        assert!(events.iter().any(|e| matches!(e, Event::VerificationRequested { .. })));
        match ui.try_recv().unwrap() {
            Signal::RequestVerificationUi(req) => {
                assert_eq!(req.timeout_secs, 120);
                assert_eq!(req.keywords, vec!["shoes".to_string()]);
            }
            other => panic!("unexpected signal {other:?}"),
        }
        assert_eq!(store.tasks().get("run").unwrap().status, TaskStatus::VerifyingStart);

        // Same instant again: nothing new.
        assert!(store.tick(t0()).is_empty());
    }

    #[test]
    fn start_result_moves_to_started_and_swaps_countdowns() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());

        publish(&store, VerificationType::Start, true, None);
        let at = t0() + Duration::seconds(20);
        store.tick(at);

        let state = store.state("run").unwrap();
        assert_eq!(state.status(), VerificationStatus::InProgress);
        assert_eq!(state.actual_start_time(), Some(at));
        assert!(store.countdown("run", CountdownKind::Start).is_none());
        assert!(store.countdown("run", CountdownKind::Finish).is_some());
        assert_eq!(store.tasks().get("run").unwrap().actual_start, Some(at));
    }

    #[test]
    fn stale_result_is_ignored() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        publish(&store, VerificationType::Complete, true, None);
        store.tick(t0() + Duration::seconds(1));
        assert_eq!(store.state("run").unwrap().status(), VerificationStatus::VerifyingStart);
        assert_eq!(store.gold().balance(), 0);
    }

    #[test]
    fn verified_completion_credits_gold_once() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        publish(&store, VerificationType::Start, true, None);
        store.tick(t0() + Duration::seconds(1));
        store.request_completion("run", t0() + Duration::minutes(25)).unwrap();

        publish(&store, VerificationType::Complete, true, None);
        publish(&store, VerificationType::Complete, true, None);
        let events = store.tick(t0() + Duration::minutes(26));

        // 8 * 1.0 * 0.8 * 1.3 * 1.0 = 8.32
        assert_eq!(store.gold().balance(), 8);
        let awards = events
            .iter()
            .filter(|e| matches!(e, Event::GoldAwarded { .. }))
            .count();
        assert_eq!(awards, 1);
        let task = store.tasks().get("run").unwrap();
        assert!(task.is_completed);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.gold_earned, 8);
        assert_eq!(store.active_countdowns(), 0);

        let entry = &store.gold().transactions()[0];
        assert_eq!(entry.task_id.as_deref(), Some("run"));
        assert_eq!(entry.task_title.as_deref(), Some("Morning run"));
        assert_eq!(entry.timestamp, t0() + Duration::minutes(26));
    }

    #[test]
    fn cancel_result_cancels_and_stops_countdowns() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        publish(&store, VerificationType::Start, false, Some(FailureReason::Cancelled));
        store.tick(t0() + Duration::seconds(3));

        let state = store.state("run").unwrap();
        assert_eq!(state.status(), VerificationStatus::Cancelled);
        assert_eq!(store.active_countdowns(), 0);
        assert_eq!(
            store.tasks().get("run").unwrap().verification_note.as_deref(),
            Some("cancelled")
        );

        store.enable("run", t0() + Duration::seconds(4)).unwrap();
        assert_eq!(store.state("run").unwrap().status(), VerificationStatus::Pending);
    }

    #[test]
    fn removing_a_task_disposes_its_countdowns() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        assert!(store.remove_task("run"));
        assert_eq!(store.active_countdowns(), 0);
        assert!(store.tick(t0() + Duration::seconds(500)).is_empty());
    }

    #[test]
    fn leaving_a_step_withdraws_its_modal() {
        let mut store = store_with(run_task());
        let mut ui = store.bus().subscribe();
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        store.cancel("run", "changed plans", t0() + Duration::seconds(10)).unwrap();
        store.enable("run", t0() + Duration::seconds(20)).unwrap();
        store.tick(t0() + Duration::seconds(20));
        assert!(store.remove_task("run"));

        let mut signals = Vec::new();
        while let Ok(signal) = ui.try_recv() {
            signals.push(signal);
        }
        let dismissals: Vec<&VerificationDismissal> = signals
            .iter()
            .filter_map(|s| match s {
                Signal::DismissVerificationUi(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(dismissals.len(), 2);
        assert!(dismissals.iter().all(|d| d.task_id == "run" && d.verification_type.is_none()));
        // the cancel's dismissal precedes the fresh request
        assert!(matches!(signals[1], Signal::DismissVerificationUi(_)));
        match &signals[2] {
            Signal::RequestVerificationUi(req) => {
                assert_eq!(req.deadline, t0() + Duration::seconds(140));
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn deleted_task_drops_its_state_on_tick() {
        let mut store = store_with(run_task());
        store.enable("run", t0()).unwrap();
        store.tick(t0());
        store.tasks_mut().remove("run");
        store.tick(t0() + Duration::seconds(1));
        assert!(store.state("run").is_none());
        assert_eq!(store.active_countdowns(), 0);
    }
}
