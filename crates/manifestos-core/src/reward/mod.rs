mod calculator;
mod ledger;

pub use calculator::{
    compute_gold, delay_penalty, dimension_multiplier, duration_multiplier, habit_penalty,
    quality_adjustment, streak_bonus, time_of_day_multiplier, BaseGold, Difficulty,
    RewardCalculator, RewardConfig, RewardRecord,
};
pub use ledger::{GoldBalance, GoldLedger, GoldTransaction, TaskRef, TransactionKind};
