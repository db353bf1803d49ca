//! Evidence recognition boundary.
//!
//! A [`Recognizer`] turns submitted photo or voice evidence into labels
//! that [`KeywordMatcher`] compares with the keywords a task requires.
//! [`BaiduRecognizer`] talks to the Baidu AI endpoints;
//! [`ScriptedRecognizer`] replays canned answers for simulations and tests.

mod baidu;
pub mod matching;
mod retry;
mod token_cache;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::RecognitionError;

pub use baidu::BaiduRecognizer;
pub use matching::{KeywordMatcher, MatchReport};
pub use retry::with_single_retry;
pub use token_cache::{AccessToken, TokenCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Voice,
}

/// Submitted evidence, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: MediaKind,
    pub data_base64: String,
    /// Audio container format (`wav`, `pcm`, `amr`, `m4a`); empty for photos.
    #[serde(default)]
    pub format: String,
    /// Audio sample rate in Hz; 0 for photos.
    #[serde(default)]
    pub rate: u32,
}

impl Evidence {
    pub fn photo(data_base64: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Photo,
            data_base64: data_base64.into(),
            format: String::new(),
            rate: 0,
        }
    }

    pub fn voice(data_base64: impl Into<String>, format: impl Into<String>, rate: u32) -> Self {
        Self {
            kind: MediaKind::Voice,
            data_base64: data_base64.into(),
            format: format.into(),
            rate,
        }
    }

    pub fn photo_bytes(bytes: &[u8]) -> Self {
        Self::photo(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Decoded payload size in bytes.
    pub fn decoded_len(&self) -> Result<usize, RecognitionError> {
        if self.data_base64.trim().is_empty() {
            return Err(RecognitionError::InvalidEvidence("empty payload".into()));
        }
        base64::engine::general_purpose::STANDARD
            .decode(self.data_base64.trim())
            .map(|bytes| bytes.len())
            .map_err(|e| RecognitionError::InvalidEvidence(format!("not base64: {e}")))
    }
}

/// What a recognizer made of the evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "labels", rename_all = "snake_case")]
pub enum Recognition {
    /// Labels or transcripts, best first.
    Labels(Vec<String>),
    /// No recognition service is configured; the evidence is trusted.
    Unverified,
}

/// Recognition collaborator.
pub trait Recognizer {
    fn recognize(
        &self,
        evidence: &Evidence,
    ) -> impl Future<Output = Result<Recognition, RecognitionError>>;
}

/// `[recognition]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_image_url")]
    pub image_url: String,
    #[serde(default = "default_speech_url")]
    pub speech_url: String,
    /// Refresh the access token this long before it expires.
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Client id sent to the speech endpoint.
    #[serde(default = "default_cuid")]
    pub cuid: String,
    /// How many image labels to keep.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_token_url() -> String {
    "https://aip.baidubce.com/oauth/2.0/token".into()
}
fn default_image_url() -> String {
    "https://aip.baidubce.com/rest/2.0/image-classify/v2/advanced_general".into()
}
fn default_speech_url() -> String {
    "https://vop.baidu.com/server_api".into()
}
fn default_token_refresh_margin_secs() -> u64 {
    86_400
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_request_timeout_secs() -> u64 {
    20
}
fn default_cuid() -> String {
    "manifestos_user".into()
}
fn default_top_n() -> usize {
    15
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            token_url: default_token_url(),
            image_url: default_image_url(),
            speech_url: default_speech_url(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            cuid: default_cuid(),
            top_n: default_top_n(),
        }
    }
}

impl RecognitionConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Recognizer that replays queued answers in order.
///
/// Clones share the queue, so a test can keep a handle and push answers
/// after the recognizer has been handed to a manager.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer {
    responses: Arc<Mutex<VecDeque<Result<Recognition, RecognitionError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<Recognition, RecognitionError>) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    pub fn push_labels<S: Into<String>>(&self, labels: impl IntoIterator<Item = S>) -> &Self {
        self.push(Ok(Recognition::Labels(labels.into_iter().map(Into::into).collect())))
    }

    /// Number of `recognize` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _evidence: &Evidence) -> Result<Recognition, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Err(RecognitionError::Exhausted))
    }
}
