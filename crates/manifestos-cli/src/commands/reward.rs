use chrono::{DateTime, Utc};
use clap::Subcommand;
use manifestos_core::reward::{delay_penalty, habit_penalty, quality_adjustment, streak_bonus};
use manifestos_core::{RewardCalculator, Task, TaskType};
use serde_json::json;
use std::path::Path;

use super::load_config;

#[derive(Subcommand)]
pub enum RewardAction {
    /// Gold for completing a task
    Gold {
        /// Priority, 1 = highest
        #[arg(long, default_value_t = 3)]
        priority: u8,
        /// Duration in minutes
        #[arg(long)]
        duration: u32,
        /// Task type (work, study, health, life, finance, social, creative, rest)
        #[arg(long = "type", default_value = "life")]
        task_type: String,
        /// Scheduled start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Growth dimension id (repeatable)
        #[arg(long = "dimension")]
        dimensions: Vec<String>,
        /// Completion quality rating, 1-5
        #[arg(long)]
        quality: Option<u8>,
        /// Apply the start-timeout penalty
        #[arg(long)]
        start_timed_out: bool,
    },
    /// Streak bonus for consecutive days
    Streak { days: u32 },
    /// Penalty for starting late
    Delay { minutes: i64 },
    /// Penalty for a bad habit, severity 1-10
    Habit { severity: u8 },
    /// Quality adjustment for a completion rating
    Quality {
        /// Rating, 1-5
        quality: u8,
        /// Gold before adjustment
        #[arg(long)]
        base: i64,
    },
}

pub fn run(action: RewardAction, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let output = match action {
        RewardAction::Gold {
            priority,
            duration,
            task_type,
            start,
            dimensions,
            quality,
            start_timed_out,
        } => {
            let mut task = Task::new("cli", "cli", duration)
                .with_priority(priority)
                .with_type(TaskType::parse(&task_type));
            if let Some(start) = start {
                task = task.scheduled_at(start);
            }
            for dimension in dimensions {
                task = task.with_dimension(dimension, 1);
            }
            task.validate()?;

            let config = load_config(config_path)?;
            let calculator = RewardCalculator::new(config.rewards);
            serde_json::to_value(calculator.reward_record(&task, quality, start_timed_out))?
        }
        RewardAction::Streak { days } => json!({ "days": days, "bonus": streak_bonus(days) }),
        RewardAction::Delay { minutes } => json!({ "minutes": minutes, "penalty": delay_penalty(minutes) }),
        RewardAction::Habit { severity } => json!({ "severity": severity, "penalty": habit_penalty(severity) }),
        RewardAction::Quality { quality, base } => json!({
            "quality": quality,
            "base": base,
            "adjustment": quality_adjustment(quality, base),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
