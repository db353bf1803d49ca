use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reward::RewardRecord;
use crate::verification::{CountdownKind, VerificationStatus, VerificationType};

/// Every state change in the verification engine produces an Event.
/// The CLI prints them; a GUI would render from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    VerificationEnabled {
        task_id: String,
        at: DateTime<Utc>,
    },
    VerificationTransition {
        task_id: String,
        from: VerificationStatus,
        to: VerificationStatus,
        at: DateTime<Utc>,
    },
    CountdownMounted {
        task_id: String,
        kind: CountdownKind,
        deadline: DateTime<Utc>,
    },
    CountdownExpired {
        task_id: String,
        kind: CountdownKind,
        at: DateTime<Utc>,
    },
    /// The store asked the UI for evidence.
    VerificationRequested {
        task_id: String,
        verification_type: VerificationType,
        deadline: DateTime<Utc>,
    },
    ModalOpened {
        task_id: String,
        verification_type: VerificationType,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    ModalClosed {
        task_id: String,
        verification_type: VerificationType,
        success: bool,
        at: DateTime<Utc>,
    },
    /// The modal was withdrawn without a result; the store had already moved on.
    ModalDismissed {
        task_id: String,
        verification_type: VerificationType,
        at: DateTime<Utc>,
    },
    /// Submitted evidence did not match; the modal stays open.
    EvidenceRejected {
        task_id: String,
        attempts: u32,
        unmatched: Vec<String>,
    },
    /// Recognition service failed; the user may retry.
    RecognitionFailed {
        task_id: String,
        message: String,
    },
    GoldAwarded {
        task_id: String,
        record: RewardRecord,
        at: DateTime<Utc>,
    },
    /// Task completed without reward.
    RewardWithheld {
        task_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    VerificationCancelled {
        task_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    VerificationFailed {
        task_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Event::VerificationEnabled { task_id, .. }
            | Event::VerificationTransition { task_id, .. }
            | Event::CountdownMounted { task_id, .. }
            | Event::CountdownExpired { task_id, .. }
            | Event::VerificationRequested { task_id, .. }
            | Event::ModalOpened { task_id, .. }
            | Event::ModalClosed { task_id, .. }
            | Event::ModalDismissed { task_id, .. }
            | Event::EvidenceRejected { task_id, .. }
            | Event::RecognitionFailed { task_id, .. }
            | Event::GoldAwarded { task_id, .. }
            | Event::RewardWithheld { task_id, .. }
            | Event::VerificationCancelled { task_id, .. }
            | Event::VerificationFailed { task_id, .. } => task_id,
        }
    }
}
