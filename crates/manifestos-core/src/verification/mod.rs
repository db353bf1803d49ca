//! Task verification.
//!
//! - [`TaskVerificationState`]: per-task lifecycle, driven by the clock and by
//!   verification results
//! - [`VerificationStore`]: owns all states, mounts countdowns, credits gold
//! - [`GlobalVerificationManager`]: shows one verification modal at a time
//!   and turns submitted evidence into results
//! - [`SignalBus`]: the only channel between store and manager

mod bus;
mod manager;
mod scheduler;
mod state;
mod store;
mod timer;

pub use bus::{
    FailureReason, Signal, SignalBus, VerificationDismissal, VerificationRequest,
    VerificationResult,
};
pub use manager::{ActiveModal, GlobalVerificationManager, SubmitOutcome};
pub use scheduler::{CountdownExpired, CountdownScheduler};
pub use state::{
    TaskVerificationState, Transition, VerificationPolicy, VerificationStatus, VerificationType,
};
pub use store::VerificationStore;
pub use timer::{
    format_remaining, window, Clock, CountdownKind, ManualClock, SystemClock, Timeout,
    VerificationTimer,
};
