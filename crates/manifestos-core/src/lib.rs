//! # ManifestOS Core Library
//!
//! Verification and reward logic for ManifestOS tasks. A task can require
//! evidence (a photo or a voice note) that it was started and finished; a
//! verified completion earns gold. The CLI binary and any GUI are thin layers
//! over this crate.
//!
//! ## Architecture
//!
//! - **Verification**: a wall-clock state machine per task. The caller
//!   invokes `tick(now)` about once a second; nothing here reads the clock
//!   on its own.
//! - **Signal bus**: the verification store asks for evidence and receives
//!   results only through [`SignalBus`].
//! - **Recognition**: photo labels and speech transcripts from Baidu AI,
//!   matched leniently against the keywords a task requires.
//! - **Rewards**: a pure gold calculator and an in-memory gold ledger.
//! - **Storage**: TOML configuration.
//!
//! ## Key Components
//!
//! - [`VerificationStore`]: owns verification states and countdowns
//! - [`GlobalVerificationManager`]: modal orchestration and evidence checks
//! - [`RewardCalculator`]: gold for a completed task
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod recognition;
pub mod reward;
pub mod storage;
pub mod task;
pub mod verification;

pub use error::{
    ConfigError, CoreError, LedgerError, RecognitionError, Result, TransitionError, ValidationError,
};
pub use events::Event;
pub use recognition::{BaiduRecognizer, Evidence, KeywordMatcher, Recognition, Recognizer};
pub use reward::{GoldBalance, GoldLedger, RewardCalculator, RewardConfig, RewardRecord};
pub use storage::Config;
pub use task::{MemoryTaskStore, Task, TaskStatus, TaskStore, TaskType};
pub use verification::{
    CountdownKind, GlobalVerificationManager, SignalBus, TaskVerificationState, VerificationPolicy,
    VerificationStatus, VerificationStore, VerificationTimer, VerificationType,
};
