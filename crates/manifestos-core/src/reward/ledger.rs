//! Gold balance boundary and the in-process ledger.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LedgerError;

/// `(task id, task title)` a transaction is recorded against.
pub type TaskRef<'a> = Option<(&'a str, &'a str)>;

/// Shared gold counter. Rewards and penalties are applied only through this trait.
///
/// `at` is the caller's clock, so replays record simulated times.
pub trait GoldBalance {
    fn credit(&mut self, amount: i64, reason: &str, task: TaskRef<'_>, at: DateTime<Utc>) -> Result<(), LedgerError>;
    fn debit(&mut self, amount: i64, reason: &str, task: TaskRef<'_>, at: DateTime<Utc>) -> Result<(), LedgerError>;
    fn balance(&self) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Earn,
    Spend,
    Penalty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldTransaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Ledger with transaction history and per-day earn/spend counters.
///
/// Newest transactions first. The daily counters reset on the first
/// transaction of a new local day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldLedger {
    balance: i64,
    today_earned: i64,
    today_spent: i64,
    transactions: Vec<GoldTransaction>,
    last_reset: Option<NaiveDate>,
}

impl Default for GoldLedger {
    fn default() -> Self {
        Self::with_balance(0)
    }
}

impl GoldLedger {
    pub fn with_balance(balance: i64) -> Self {
        Self {
            balance,
            today_earned: 0,
            today_spent: 0,
            transactions: Vec::new(),
            last_reset: None,
        }
    }

    pub fn today_earned(&self) -> i64 {
        self.today_earned
    }

    pub fn today_spent(&self) -> i64 {
        self.today_spent
    }

    pub fn transactions(&self) -> &[GoldTransaction] {
        &self.transactions
    }

    /// Transactions recorded on the same local day as `now`.
    pub fn transactions_on(&self, now: DateTime<Utc>) -> Vec<&GoldTransaction> {
        let day = now.with_timezone(&Local).date_naive();
        self.transactions
            .iter()
            .filter(|t| t.timestamp.with_timezone(&Local).date_naive() == day)
            .collect()
    }

    /// Record earned gold for a task.
    pub fn earn(
        &mut self,
        amount: i64,
        reason: &str,
        task: TaskRef<'_>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        self.roll_day(at);
        self.balance += amount;
        self.today_earned += amount;
        self.push(TransactionKind::Earn, amount, reason, task, at);
        debug!(amount, balance = self.balance, reason, "gold earned");
        Ok(())
    }

    /// Spend gold; fails without side effects when the balance is too low.
    pub fn spend(
        &mut self,
        amount: i64,
        reason: &str,
        task: TaskRef<'_>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        if self.balance < amount {
            warn!(amount, balance = self.balance, "insufficient gold");
            return Err(LedgerError::InsufficientBalance {
                needed: amount,
                balance: self.balance,
            });
        }
        self.roll_day(at);
        self.balance -= amount;
        self.today_spent += amount;
        self.push(TransactionKind::Spend, amount, reason, task, at);
        debug!(amount, balance = self.balance, reason, "gold spent");
        Ok(())
    }

    /// Apply a penalty. Penalties may take the balance below zero.
    pub fn penalize(
        &mut self,
        amount: i64,
        reason: &str,
        task: TaskRef<'_>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        self.roll_day(at);
        self.balance -= amount;
        self.push(TransactionKind::Penalty, amount, reason, task, at);
        debug!(amount, balance = self.balance, reason, "gold penalty");
        Ok(())
    }

    fn roll_day(&mut self, at: DateTime<Utc>) {
        let day = at.with_timezone(&Local).date_naive();
        if self.last_reset != Some(day) {
            self.today_earned = 0;
            self.today_spent = 0;
            self.last_reset = Some(day);
        }
    }

    fn push(
        &mut self,
        kind: TransactionKind,
        amount: i64,
        reason: &str,
        task: TaskRef<'_>,
        at: DateTime<Utc>,
    ) {
        self.transactions.insert(
            0,
            GoldTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                amount,
                reason: reason.to_string(),
                task_id: task.map(|(id, _)| id.to_string()),
                task_title: task.map(|(_, title)| title.to_string()),
                timestamp: at,
            },
        );
    }
}

impl GoldBalance for GoldLedger {
    fn credit(&mut self, amount: i64, reason: &str, task: TaskRef<'_>, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.earn(amount, reason, task, at)
    }

    fn debit(&mut self, amount: i64, reason: &str, task: TaskRef<'_>, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.spend(amount, reason, task, at)
    }

    fn balance(&self) -> i64 {
        self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn earn_and_spend_track_balance_and_history() {
        let mut ledger = GoldLedger::with_balance(100);
        let now = Utc::now();
        ledger.earn(50, "finished essay", Some(("t1", "Essay")), now).unwrap();
        ledger.spend(30, "bought skip card", None, now).unwrap();

        assert_eq!(ledger.balance(), 120);
        assert_eq!(ledger.today_earned(), 50);
        assert_eq!(ledger.today_spent(), 30);
        assert_eq!(ledger.transactions().len(), 2);
        assert_eq!(ledger.transactions()[0].kind, TransactionKind::Spend);
        assert_eq!(ledger.transactions()[1].task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn overspending_is_rejected_without_side_effects() {
        let mut ledger = GoldLedger::with_balance(10);
        let err = ledger.debit(11, "too expensive", None, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                needed: 11,
                balance: 10
            }
        );
        assert_eq!(ledger.balance(), 10);
        assert!(ledger.transactions().is_empty());
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut ledger = GoldLedger::default();
        assert_eq!(ledger.credit(-1, "oops", None, Utc::now()), Err(LedgerError::NegativeAmount(-1)));
    }

    #[test]
    fn penalty_can_go_below_zero() {
        let mut ledger = GoldLedger::default();
        ledger.penalize(20, "late start", None, Utc::now()).unwrap();
        assert_eq!(ledger.balance(), -20);
    }

    #[test]
    fn daily_counters_reset_on_new_day() {
        let mut ledger = GoldLedger::default();
        let day_one = Utc::now();
        ledger.earn(40, "a", None, day_one).unwrap();
        ledger.earn(10, "b", None, day_one + Duration::days(1)).unwrap();
        assert_eq!(ledger.today_earned(), 10);
        assert_eq!(ledger.balance(), 50);
        assert_eq!(ledger.transactions_on(day_one + Duration::days(1)).len(), 1);
    }
}
