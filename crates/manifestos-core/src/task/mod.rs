//! Task model shared by the reward calculator and the verification engine.
//!
//! A task is a schedulable unit of work on the timeline. The verification
//! engine reads tasks and reports lifecycle changes back through the
//! [`TaskStore`] boundary; it never owns them.

pub mod store;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

pub use store::{MemoryTaskStore, TaskStore, TaskUpdate};

/// Lifecycle status of a task as seen by the timeline.
///
/// ```text
/// Pending -> VerifyingStart -> InProgress -> VerifyingComplete -> Completed
///    |             |               |                |
///    +-------------+---------------+----------------+--> Cancelled | Failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    VerifyingStart,
    InProgress,
    VerifyingComplete,
    Completed,
    Failed,
    Cancelled,
}

/// Task category. Drives the type multiplier of the reward calculator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Work,
    /// Also accepted as `learning`.
    Study,
    /// Also accepted as `sport`.
    Health,
    #[default]
    Life,
    Finance,
    Creative,
    Social,
    Rest,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        TaskType::Work,
        TaskType::Study,
        TaskType::Health,
        TaskType::Life,
        TaskType::Finance,
        TaskType::Creative,
        TaskType::Social,
        TaskType::Rest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Work => "work",
            TaskType::Study => "study",
            TaskType::Health => "health",
            TaskType::Life => "life",
            TaskType::Finance => "finance",
            TaskType::Creative => "creative",
            TaskType::Social => "social",
            TaskType::Rest => "rest",
        }
    }

    /// Lenient parse. Unknown categories fall back to `Life`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => TaskType::Work,
            "study" | "learning" => TaskType::Study,
            "health" | "sport" => TaskType::Health,
            "finance" => TaskType::Finance,
            "creative" => TaskType::Creative,
            "social" => TaskType::Social,
            "rest" => TaskType::Rest,
            _ => TaskType::Life,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        TaskType::parse(&s)
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How evidence is captured for a verification step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    /// Live camera capture
    #[default]
    Photo,
    /// File picked from the device
    Upload,
}

/// Verification requirements attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VerificationRequirement {
    #[serde(default)]
    pub start_keywords: Vec<String>,
    #[serde(default)]
    pub completion_keywords: Vec<String>,
    #[serde(default)]
    pub source: EvidenceSource,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub status: TaskStatus,
    /// 1 = highest.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub task_type: TaskType,
    /// Growth dimension id -> contributed points.
    #[serde(default)]
    pub growth_dimensions: BTreeMap<String, u32>,
    #[serde(default)]
    pub verification: Option<VerificationRequirement>,
    #[serde(default)]
    pub actual_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gold_earned: i64,
    /// Last verification failure reported for this task.
    #[serde(default)]
    pub verification_note: Option<String>,
}

fn default_priority() -> u8 {
    3
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            scheduled_start: None,
            scheduled_end: None,
            duration_minutes,
            is_completed: false,
            status: TaskStatus::Pending,
            priority: default_priority(),
            task_type: TaskType::default(),
            growth_dimensions: BTreeMap::new(),
            verification: None,
            actual_start: None,
            end_time: None,
            gold_earned: 0,
            verification_note: None,
        }
    }

    /// Schedule the task at `start`; the end follows from the duration.
    pub fn scheduled_at(mut self, start: DateTime<Utc>) -> Self {
        self.scheduled_start = Some(start);
        self.scheduled_end = Some(start + Duration::minutes(self.duration_minutes as i64));
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>, points: u32) -> Self {
        self.growth_dimensions.insert(dimension.into(), points);
        self
    }

    pub fn with_verification<S: Into<String>>(
        mut self,
        start_keywords: impl IntoIterator<Item = S>,
        completion_keywords: impl IntoIterator<Item = S>,
    ) -> Self {
        self.verification = Some(VerificationRequirement {
            start_keywords: start_keywords.into_iter().map(Into::into).collect(),
            completion_keywords: completion_keywords.into_iter().map(Into::into).collect(),
            source: EvidenceSource::Photo,
        });
        self
    }

    /// Check the structural invariants of the task.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.duration_minutes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "duration_minutes".into(),
                message: "must be greater than zero".into(),
            });
        }
        if let (Some(start), Some(end)) = (self.scheduled_start, self.scheduled_end) {
            if end <= start {
                return Err(ValidationError::InvalidTimeRange { start, end });
            }
        }
        Ok(())
    }

    /// Scheduled end, or start + duration when only the start is known.
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        self.scheduled_end.or_else(|| {
            self.scheduled_start
                .map(|s| s + Duration::minutes(self.duration_minutes as i64))
        })
    }

    /// Number of growth dimensions that count toward the reward (at most 3).
    pub fn counted_dimensions(&self) -> usize {
        self.growth_dimensions.len().min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn task_type_accepts_aliases_and_falls_back_to_life() {
        let t: TaskType = serde_json::from_str("\"learning\"").unwrap();
        assert_eq!(t, TaskType::Study);
        let t: TaskType = serde_json::from_str("\"sport\"").unwrap();
        assert_eq!(t, TaskType::Health);
        let t: TaskType = serde_json::from_str("\"gardening\"").unwrap();
        assert_eq!(t, TaskType::Life);
        assert_eq!(serde_json::to_string(&TaskType::Study).unwrap(), "\"study\"");
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut task = Task::new("t1", "Read", 30).scheduled_at(at(10, 0));
        task.scheduled_end = Some(at(9, 0));
        assert!(matches!(
            task.validate(),
            Err(ValidationError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_duration() {
        let task = Task::new("t1", "Read", 0);
        assert!(task.validate().is_err());
    }

    #[test]
    fn effective_end_falls_back_to_duration() {
        let mut task = Task::new("t1", "Read", 45);
        assert_eq!(task.effective_end(), None);
        task.scheduled_start = Some(at(10, 0));
        assert_eq!(task.effective_end(), Some(at(10, 45)));
        task.scheduled_end = Some(at(11, 0));
        assert_eq!(task.effective_end(), Some(at(11, 0)));
    }

    #[test]
    fn only_three_dimensions_count() {
        let task = Task::new("t1", "Run", 30)
            .with_dimension("fitness", 2)
            .with_dimension("discipline", 1)
            .with_dimension("mood", 1)
            .with_dimension("health", 3);
        assert_eq!(task.counted_dimensions(), 3);
    }

    #[test]
    fn task_deserializes_with_defaults() {
        let task: Task = serde_json::from_str(
            r#"{"id":"a","title":"Write","duration_minutes":25,"task_type":"creative"}"#,
        )
        .unwrap();
        assert_eq!(task.priority, 3);
        assert_eq!(task.task_type, TaskType::Creative);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.verification.is_none());
    }
}
