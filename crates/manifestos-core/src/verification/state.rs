//! Per-task verification state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Pending -> WaitingStart -> VerifyingStart -> Started -> InProgress
//!                 |                               ^           |
//!                 +------------(accepted/timeout)-+           v
//!                                              VerifyingComplete -> Completed
//!
//! any non-terminal -> Cancelled -> (re-enable) -> Pending
//! VerifyingStart | VerifyingComplete -> Failed (evidence rejected too often)
//! ```
//!
//! Every operation checks the current state before acting; a request that
//! only makes sense from another state returns
//! [`TransitionError::InvalidTransition`] and changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TransitionError, ValidationError};
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    WaitingStart,
    VerifyingStart,
    Started,
    InProgress,
    VerifyingComplete,
    Completed,
    Failed,
    Cancelled,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::WaitingStart => "waiting_start",
            VerificationStatus::VerifyingStart => "verifying_start",
            VerificationStatus::Started => "started",
            VerificationStatus::InProgress => "in_progress",
            VerificationStatus::VerifyingComplete => "verifying_complete",
            VerificationStatus::Completed => "completed",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Cancelled => "cancelled",
        }
    }

    /// States in which `actual_start_time` is recorded.
    pub fn has_started(self) -> bool {
        matches!(
            self,
            VerificationStatus::Started
                | VerificationStatus::InProgress
                | VerificationStatus::VerifyingComplete
                | VerificationStatus::Completed
        )
    }

    /// `Cancelled` is terminal but recoverable through re-enable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VerificationStatus::Completed | VerificationStatus::Failed | VerificationStatus::Cancelled
        )
    }

    /// Matching task lifecycle status.
    pub fn task_status(self) -> TaskStatus {
        match self {
            VerificationStatus::Pending | VerificationStatus::WaitingStart => TaskStatus::Pending,
            VerificationStatus::VerifyingStart => TaskStatus::VerifyingStart,
            VerificationStatus::Started | VerificationStatus::InProgress => TaskStatus::InProgress,
            VerificationStatus::VerifyingComplete => TaskStatus::VerifyingComplete,
            VerificationStatus::Completed => TaskStatus::Completed,
            VerificationStatus::Failed => TaskStatus::Failed,
            VerificationStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which verification step a request or result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationType {
    Start,
    Complete,
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationType::Start => f.write_str("start"),
            VerificationType::Complete => f.write_str("complete"),
        }
    }
}

/// `[verification]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationPolicy {
    /// Seconds the user has to verify a start.
    #[serde(default = "default_window_secs")]
    pub start_window_secs: u64,
    /// Seconds the user has to verify a completion.
    #[serde(default = "default_window_secs")]
    pub completion_window_secs: u64,
    /// How early (ms) a start still counts as reached.
    #[serde(default = "default_start_tolerance_ms")]
    pub start_tolerance_ms: u64,
    /// Rejected submissions before a step fails.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
    /// Share of required keywords that must match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

fn default_window_secs() -> u64 {
    120
}
fn default_start_tolerance_ms() -> u64 {
    1000
}
fn default_max_rejections() -> u32 {
    3
}
fn default_match_threshold() -> f64 {
    0.2
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            start_window_secs: default_window_secs(),
            completion_window_secs: default_window_secs(),
            start_tolerance_ms: default_start_tolerance_ms(),
            max_rejections: default_max_rejections(),
            match_threshold: default_match_threshold(),
        }
    }
}

/// An applied state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: VerificationStatus,
    pub to: VerificationStatus,
    pub at: DateTime<Utc>,
}

/// Verification state of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskVerificationState {
    task_id: String,
    status: VerificationStatus,
    enabled: bool,
    start_keywords: Vec<String>,
    completion_keywords: Vec<String>,
    actual_start_time: Option<DateTime<Utc>>,
    last_evaluated_at: Option<DateTime<Utc>>,
    /// Start window elapsed without evidence; reward is reduced.
    start_timed_out: bool,
    /// Completion window elapsed without evidence; no reward.
    completion_timed_out: bool,
    rejected_attempts: u32,
    gold_earned: i64,
    failure_reason: Option<String>,
}

impl TaskVerificationState {
    /// New state in `Pending`. Both keyword lists must be non-empty.
    pub fn new(
        task_id: impl Into<String>,
        start_keywords: Vec<String>,
        completion_keywords: Vec<String>,
    ) -> Result<Self, ValidationError> {
        if start_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ValidationError::EmptyCollection("start_keywords".into()));
        }
        if completion_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ValidationError::EmptyCollection("completion_keywords".into()));
        }
        Ok(Self {
            task_id: task_id.into(),
            status: VerificationStatus::Pending,
            enabled: true,
            start_keywords,
            completion_keywords,
            actual_start_time: None,
            last_evaluated_at: None,
            start_timed_out: false,
            completion_timed_out: false,
            rejected_attempts: 0,
            gold_earned: 0,
            failure_reason: None,
        })
    }

    /// State for a task carrying verification requirements.
    pub fn for_task(task: &Task) -> Result<Self, ValidationError> {
        let requirement = task
            .verification
            .as_ref()
            .ok_or_else(|| ValidationError::EmptyCollection("verification".into()))?;
        Self::new(
            task.id.clone(),
            requirement.start_keywords.clone(),
            requirement.completion_keywords.clone(),
        )
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn start_keywords(&self) -> &[String] {
        &self.start_keywords
    }

    pub fn completion_keywords(&self) -> &[String] {
        &self.completion_keywords
    }

    /// Keywords required for a verification step.
    pub fn keywords(&self, verification_type: VerificationType) -> &[String] {
        match verification_type {
            VerificationType::Start => &self.start_keywords,
            VerificationType::Complete => &self.completion_keywords,
        }
    }

    pub fn actual_start_time(&self) -> Option<DateTime<Utc>> {
        self.actual_start_time
    }

    pub fn last_evaluated_at(&self) -> Option<DateTime<Utc>> {
        self.last_evaluated_at
    }

    pub fn start_timed_out(&self) -> bool {
        self.start_timed_out
    }

    pub fn completion_timed_out(&self) -> bool {
        self.completion_timed_out
    }

    pub fn rejected_attempts(&self) -> u32 {
        self.rejected_attempts
    }

    pub fn gold_earned(&self) -> i64 {
        self.gold_earned
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    // ── Time-driven evaluation ───────────────────────────────────────

    /// Apply the transition the clock calls for, if any.
    ///
    /// Idempotent: a second call at the same instant, or a call with no
    /// state change due, returns `None`. Tasks without a scheduled start
    /// are never eligible to leave `Pending` on their own.
    pub fn evaluate(
        &mut self,
        task: &Task,
        now: DateTime<Utc>,
        policy: &VerificationPolicy,
    ) -> Option<Transition> {
        if !self.enabled || self.last_evaluated_at == Some(now) {
            return None;
        }
        self.last_evaluated_at = Some(now);

        match self.status {
            VerificationStatus::Pending => {
                let start = task.scheduled_start?;
                let tolerance = i64::try_from(policy.start_tolerance_ms).unwrap_or(i64::MAX);
                if (now - start).num_milliseconds() >= -tolerance {
                    Some(self.advance(VerificationStatus::WaitingStart, now))
                } else {
                    None
                }
            }
            VerificationStatus::Started => {
                if end_reached(task, now) {
                    Some(self.advance(VerificationStatus::VerifyingComplete, now))
                } else {
                    Some(self.advance(VerificationStatus::InProgress, now))
                }
            }
            VerificationStatus::InProgress if end_reached(task, now) => {
                Some(self.advance(VerificationStatus::VerifyingComplete, now))
            }
            _ => None,
        }
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// The start verification UI has been requested.
    pub fn request_start_verification(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        self.require(&[VerificationStatus::WaitingStart], "request start verification")?;
        Ok(self.advance(VerificationStatus::VerifyingStart, now))
    }

    /// Start evidence was accepted.
    pub fn start_verified(&mut self, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
        self.require(
            &[VerificationStatus::WaitingStart, VerificationStatus::VerifyingStart],
            "verify start",
        )?;
        Ok(self.begin(now))
    }

    /// The start window elapsed. The task still starts, flagged for a penalty.
    pub fn start_window_expired(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        self.require(
            &[VerificationStatus::WaitingStart, VerificationStatus::VerifyingStart],
            "expire start window",
        )?;
        self.start_timed_out = true;
        Ok(self.begin(now))
    }

    /// The user signalled completion before the scheduled end.
    pub fn request_completion(&mut self, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
        self.require(
            &[VerificationStatus::Started, VerificationStatus::InProgress],
            "request completion",
        )?;
        Ok(self.advance(VerificationStatus::VerifyingComplete, now))
    }

    /// Completion evidence was accepted; `gold` is the awarded amount.
    pub fn completion_verified(
        &mut self,
        now: DateTime<Utc>,
        gold: i64,
    ) -> Result<Transition, TransitionError> {
        self.require(&[VerificationStatus::VerifyingComplete], "verify completion")?;
        self.gold_earned = gold;
        Ok(self.advance(VerificationStatus::Completed, now))
    }

    /// The completion window elapsed. The task completes without reward.
    pub fn completion_window_expired(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        self.require(&[VerificationStatus::VerifyingComplete], "expire completion window")?;
        self.completion_timed_out = true;
        self.gold_earned = 0;
        Ok(self.advance(VerificationStatus::Completed, now))
    }

    /// Evidence was rejected `attempts` times, reaching the limit.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Result<Transition, TransitionError> {
        self.require(
            &[VerificationStatus::VerifyingStart, VerificationStatus::VerifyingComplete],
            "fail verification",
        )?;
        self.rejected_attempts = attempts;
        self.failure_reason = Some(reason.into());
        self.actual_start_time = None;
        Ok(self.advance(VerificationStatus::Failed, now))
    }

    /// Explicit cancellation. Allowed from every non-terminal state.
    pub fn cancel(
        &mut self,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<Transition, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }
        self.enabled = false;
        self.failure_reason = Some(reason.into());
        self.actual_start_time = None;
        Ok(self.advance(VerificationStatus::Cancelled, now))
    }

    /// Reset a cancelled verification to `Pending`.
    pub fn re_enable(&mut self, now: DateTime<Utc>) -> Result<Transition, TransitionError> {
        self.require(&[VerificationStatus::Cancelled], "re-enable")?;
        self.enabled = true;
        self.last_evaluated_at = None;
        self.start_timed_out = false;
        self.completion_timed_out = false;
        self.rejected_attempts = 0;
        self.gold_earned = 0;
        self.failure_reason = None;
        Ok(self.advance(VerificationStatus::Pending, now))
    }

    fn require(
        &self,
        allowed: &[VerificationStatus],
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    fn begin(&mut self, now: DateTime<Utc>) -> Transition {
        if self.actual_start_time.is_none() {
            self.actual_start_time = Some(now);
        }
        self.advance(VerificationStatus::Started, now)
    }

    fn advance(&mut self, to: VerificationStatus, now: DateTime<Utc>) -> Transition {
        let from = self.status;
        self.status = to;
        Transition { from, to, at: now }
    }
}

fn end_reached(task: &Task, now: DateTime<Utc>) -> bool {
    task.effective_end().is_some_and(|end| now >= end)
}
