//! Gold reward calculator.
//!
//! All functions here are pure and total: out-of-range inputs are clamped,
//! nothing panics, nothing touches the clock.
//!
//! ```text
//! gold = round(base(priority) * duration * type * time_of_day * dimensions)
//! ```

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::task::{Task, TaskType};

/// Four-level difficulty derived from task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Simple,
    Medium,
    Difficult,
    Challenge,
}

impl Difficulty {
    /// Priority 1 is the hardest; 0 is clamped to 1.
    pub fn from_priority(priority: u8) -> Self {
        match priority.max(1) {
            1 => Difficulty::Challenge,
            2 => Difficulty::Difficult,
            3 => Difficulty::Medium,
            _ => Difficulty::Simple,
        }
    }
}

/// Base gold per difficulty level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseGold {
    #[serde(default = "default_simple")]
    pub simple: i64,
    #[serde(default = "default_medium")]
    pub medium: i64,
    #[serde(default = "default_difficult")]
    pub difficult: i64,
    #[serde(default = "default_challenge")]
    pub challenge: i64,
}

impl BaseGold {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> i64 {
        match difficulty {
            Difficulty::Simple => self.simple,
            Difficulty::Medium => self.medium,
            Difficulty::Difficult => self.difficult,
            Difficulty::Challenge => self.challenge,
        }
    }
}

fn default_simple() -> i64 {
    5
}
fn default_medium() -> i64 {
    8
}
fn default_difficult() -> i64 {
    12
}
fn default_challenge() -> i64 {
    20
}

impl Default for BaseGold {
    fn default() -> Self {
        Self {
            simple: default_simple(),
            medium: default_medium(),
            difficult: default_difficult(),
            challenge: default_challenge(),
        }
    }
}

/// `[rewards]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardConfig {
    #[serde(default)]
    pub base_gold: BaseGold,
    /// Task type name -> multiplier. Missing types use 1.0.
    #[serde(default = "default_type_multipliers")]
    pub type_multipliers: BTreeMap<String, f64>,
    /// Offset of the user's local time from UTC, for time-of-day bands.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Share of gold removed when the start window timed out.
    #[serde(default = "default_start_timeout_penalty_pct")]
    pub start_timeout_penalty_pct: u8,
}

fn default_type_multipliers() -> BTreeMap<String, f64> {
    TaskType::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), builtin_type_multiplier(*t)))
        .collect()
}

fn default_start_timeout_penalty_pct() -> u8 {
    30
}

fn builtin_type_multiplier(task_type: TaskType) -> f64 {
    match task_type {
        TaskType::Health => 2.0,
        TaskType::Creative => 1.5,
        TaskType::Study => 1.3,
        TaskType::Work | TaskType::Finance | TaskType::Social => 1.0,
        TaskType::Life => 0.8,
        TaskType::Rest => 0.5,
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_gold: BaseGold::default(),
            type_multipliers: default_type_multipliers(),
            utc_offset_minutes: 0,
            start_timeout_penalty_pct: default_start_timeout_penalty_pct(),
        }
    }
}

/// Itemized result of rewarding one completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub difficulty: Difficulty,
    pub base_gold: i64,
    pub duration_multiplier: f64,
    pub type_multiplier: f64,
    pub time_of_day_multiplier: f64,
    pub dimension_multiplier: f64,
    /// `round(base * all multipliers)`.
    pub computed_gold: i64,
    pub quality_adjustment: i64,
    pub start_timeout_penalty: i64,
    pub final_gold: i64,
}

/// Reward calculator bound to a [`RewardConfig`].
#[derive(Debug, Clone, Default)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn type_multiplier(&self, task_type: TaskType) -> f64 {
        self.config
            .type_multipliers
            .get(task_type.as_str())
            .copied()
            .filter(|m| m.is_finite() && *m >= 0.0)
            .unwrap_or(1.0)
    }

    /// Time-of-day multiplier for a scheduled start, in the configured local offset.
    pub fn time_of_day_multiplier(&self, start: Option<DateTime<Utc>>) -> f64 {
        let Some(start) = start else {
            return 1.0;
        };
        let offset_secs = self.config.utc_offset_minutes.clamp(-14 * 60, 14 * 60) * 60;
        let hour = match FixedOffset::east_opt(offset_secs) {
            Some(offset) => start.with_timezone(&offset).hour(),
            None => start.hour(),
        };
        time_of_day_multiplier(hour)
    }

    /// Gold awarded for a task before quality and penalties.
    pub fn compute_gold(&self, task: &Task) -> i64 {
        self.raw_gold(task).round() as i64
    }

    fn raw_gold(&self, task: &Task) -> f64 {
        let base = self
            .config
            .base_gold
            .for_difficulty(Difficulty::from_priority(task.priority)) as f64;
        base * duration_multiplier(task.duration_minutes)
            * self.type_multiplier(task.task_type)
            * self.time_of_day_multiplier(task.scheduled_start)
            * dimension_multiplier(task.counted_dimensions())
    }

    /// Full itemized reward for a completed task.
    ///
    /// `quality` is the optional 1-5 completion rating; `start_timed_out`
    /// applies the start-window penalty to the quality-adjusted amount.
    pub fn reward_record(&self, task: &Task, quality: Option<u8>, start_timed_out: bool) -> RewardRecord {
        let difficulty = Difficulty::from_priority(task.priority);
        let computed_gold = self.compute_gold(task);
        let quality_adjustment = quality
            .map(|q| quality_adjustment(q, computed_gold))
            .unwrap_or(0);
        let subtotal = (computed_gold + quality_adjustment).max(0);
        let final_gold = if start_timed_out {
            let keep = 1.0 - f64::from(self.config.start_timeout_penalty_pct.min(100)) / 100.0;
            (subtotal as f64 * keep).round() as i64
        } else {
            subtotal
        };

        RewardRecord {
            difficulty,
            base_gold: self.config.base_gold.for_difficulty(difficulty),
            duration_multiplier: duration_multiplier(task.duration_minutes),
            type_multiplier: self.type_multiplier(task.task_type),
            time_of_day_multiplier: self.time_of_day_multiplier(task.scheduled_start),
            dimension_multiplier: dimension_multiplier(task.counted_dimensions()),
            computed_gold,
            quality_adjustment,
            start_timeout_penalty: subtotal - final_gold,
            final_gold,
        }
    }
}

/// Gold for a task with the default reward table.
pub fn compute_gold(task: &Task) -> i64 {
    RewardCalculator::default().compute_gold(task)
}

/// Linear growth past two hours: +0.5 per extra half hour.
pub fn duration_multiplier(minutes: u32) -> f64 {
    match minutes {
        0..=30 => 1.0,
        31..=60 => 1.8,
        61..=120 => 3.0,
        m => 4.0 + (f64::from(m - 120) / 30.0) * 0.5,
    }
}

/// Multiplier for a local start hour (0-23, larger values clamp to 23).
pub fn time_of_day_multiplier(hour: u32) -> f64 {
    match hour.min(23) {
        9..=11 | 14..=16 => 1.3,
        0..=5 | 22..=23 => 0.7,
        _ => 1.0,
    }
}

pub fn dimension_multiplier(dimensions: usize) -> f64 {
    match dimensions {
        0 => 1.0,
        1 => 1.1,
        2 => 1.3,
        _ => 1.5,
    }
}

/// Bonus for a run of consecutive days; highest band reached, not cumulative.
pub fn streak_bonus(consecutive_days: u32) -> i64 {
    match consecutive_days {
        30..=u32::MAX => 2000,
        15..=29 => 800,
        7..=14 => 300,
        3..=6 => 100,
        _ => 0,
    }
}

/// Penalty for starting late. No delay, no penalty.
pub fn delay_penalty(delay_minutes: i64) -> i64 {
    match delay_minutes {
        i64::MIN..=0 => 0,
        1..=5 => 20,
        6..=15 => 50,
        _ => 100,
    }
}

/// Penalty for a bad-habit occurrence of severity 1-10 (clamped).
pub fn habit_penalty(severity: u8) -> i64 {
    match severity.clamp(1, 10) {
        1..=3 => 20,
        4..=7 => 50,
        _ => 100,
    }
}

/// Additive adjustment for a 1-5 completion quality rating (clamped).
pub fn quality_adjustment(quality: u8, base_gold: i64) -> i64 {
    let factor = match quality.clamp(1, 5) {
        5 => 0.5,
        4 => 0.2,
        3 => 0.0,
        2 => -0.2,
        _ => -0.5,
    };
    (base_gold as f64 * factor).round() as i64
}
