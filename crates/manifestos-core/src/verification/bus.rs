//! Typed publish/subscribe channel for the verification subsystem.
//!
//! Delivery is in-process and best-effort: a signal reaches the subscribers
//! that exist when it is published. Late subscribers miss it; nothing is
//! replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use super::state::VerificationType;

/// Asks the verification UI to open a modal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub task_id: String,
    pub task_title: String,
    pub verification_type: VerificationType,
    /// Human-readable requirement shown in the modal.
    pub requirement: String,
    pub keywords: Vec<String>,
    pub timeout_secs: u64,
    /// When the window closes.
    pub deadline: DateTime<Utc>,
}

/// Why a verification step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    Timeout,
    Rejected { message: String, attempts: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Rejected { message, attempts } => {
                write!(f, "rejected after {attempts} attempts: {message}")
            }
        }
    }
}

/// Outcome of one verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub task_id: String,
    pub verification_type: VerificationType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl VerificationResult {
    pub fn accepted(request: &VerificationRequest, evidence: Option<String>) -> Self {
        Self {
            task_id: request.task_id.clone(),
            verification_type: request.verification_type,
            success: true,
            evidence,
            reason: None,
        }
    }

    pub fn failed(request: &VerificationRequest, reason: FailureReason) -> Self {
        Self {
            task_id: request.task_id.clone(),
            verification_type: request.verification_type,
            success: false,
            evidence: None,
            reason: Some(reason),
        }
    }
}

/// Withdraws the modal, open or queued, of a task whose verification
/// has moved past the step it was asking for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDismissal {
    pub task_id: String,
    /// `None` withdraws both steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_type: Option<VerificationType>,
}

impl VerificationDismissal {
    pub fn task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            verification_type: None,
        }
    }

    pub fn step(task_id: impl Into<String>, verification_type: VerificationType) -> Self {
        Self {
            task_id: task_id.into(),
            verification_type: Some(verification_type),
        }
    }

    pub fn covers(&self, request: &VerificationRequest) -> bool {
        self.task_id == request.task_id
            && self
                .verification_type
                .map_or(true, |t| t == request.verification_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum Signal {
    RequestVerificationUi(VerificationRequest),
    DismissVerificationUi(VerificationDismissal),
    VerificationResult(VerificationResult),
}

/// Cloneable handle to the signal channel.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SignalBus {
    /// `capacity` bounds how many signals a slow subscriber may lag behind.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Publish to the current subscribers. Returns how many received it.
    pub fn publish(&self, signal: Signal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }
}
