//! Baidu AI recognition client.
//!
//! 1. Exchanges API key + secret for an access token (cached, see [`TokenCache`])
//! 2. Photos go to the general image classifier, labels best first
//! 3. Voice goes to the speech endpoint, transcripts best first
//!
//! Without credentials the recognizer trusts the evidence and answers
//! [`Recognition::Unverified`].

use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{Evidence, MediaKind, Recognition, RecognitionConfig, Recognizer, TokenCache};
use crate::error::RecognitionError;

/// Image API codes meaning the access token is invalid or expired.
const IMAGE_TOKEN_ERRORS: &[i64] = &[110, 111];
/// Speech API code for an invalid token.
const SPEECH_TOKEN_ERROR: i64 = 3302;

#[derive(Debug)]
pub struct BaiduRecognizer {
    client: Client,
    config: RecognitionConfig,
    tokens: Mutex<TokenCache>,
}

impl BaiduRecognizer {
    pub fn new(config: RecognitionConfig) -> Result<Self, RecognitionError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        let margin = Duration::seconds(config.token_refresh_margin_secs.min(365 * 24 * 3600) as i64);
        Ok(Self {
            client,
            config,
            tokens: Mutex::new(TokenCache::new(margin)),
        })
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Cached token, or a fresh one from the token endpoint.
    pub async fn access_token(&self) -> Result<String, RecognitionError> {
        let mut cache = self.tokens.lock().await;
        let now = Utc::now();
        if let Some(token) = cache.valid_token(now) {
            return Ok(token.to_string());
        }

        debug!("requesting new access token");
        let url = Url::parse_with_params(
            &self.config.token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.api_key.as_str()),
                ("client_secret", self.config.secret_key.as_str()),
            ],
        )?;
        let body = read_json(self.client.post(url).send().await?).await?;

        if let Some(error) = body.get("error") {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(RecognitionError::TokenRequest(format!(
                "{}: {description}",
                error.as_str().unwrap_or("error")
            )));
        }
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RecognitionError::TokenRequest("response has no access_token".into()))?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(0);

        let stored = cache.store(token.clone(), expires_in, now);
        info!(expires_at = %stored.expires_at, "access token refreshed");
        Ok(token)
    }

    async fn classify_image(&self, evidence: &Evidence) -> Result<Vec<String>, RecognitionError> {
        evidence.decoded_len()?;
        let token = self.access_token().await?;
        let url = Url::parse_with_params(&self.config.image_url, &[("access_token", token.as_str())])?;
        let baike_num = self.config.top_n.to_string();
        let response = self
            .client
            .post(url)
            .form(&[("image", evidence.data_base64.trim()), ("baike_num", baike_num.as_str())])
            .send()
            .await?;
        let body = read_json(response).await?;

        if let Some(code) = body.get("error_code").and_then(Value::as_i64) {
            if IMAGE_TOKEN_ERRORS.contains(&code) {
                self.tokens.lock().await.invalidate();
            }
            return Err(service_error(code, &body, "error_msg"));
        }

        let labels: Vec<String> = body
            .get("result")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("keyword").and_then(Value::as_str))
                    .map(str::to_string)
                    .take(self.config.top_n)
                    .collect()
            })
            .unwrap_or_default();
        debug!(count = labels.len(), "image labels received");
        Ok(labels)
    }

    async fn transcribe(&self, evidence: &Evidence) -> Result<Vec<String>, RecognitionError> {
        let len = evidence.decoded_len()?;
        if evidence.format.is_empty() || evidence.rate == 0 {
            return Err(RecognitionError::InvalidEvidence(
                "voice evidence needs a format and sample rate".into(),
            ));
        }
        let token = self.access_token().await?;
        let payload = json!({
            "format": evidence.format,
            "rate": evidence.rate,
            "channel": 1,
            "cuid": self.config.cuid,
            "token": token,
            "speech": evidence.data_base64.trim(),
            "len": len,
        });
        let response = self
            .client
            .post(&self.config.speech_url)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;

        let code = body.get("err_no").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            if code == SPEECH_TOKEN_ERROR {
                self.tokens.lock().await.invalidate();
            }
            return Err(service_error(code, &body, "err_msg"));
        }
        Ok(body
            .get("result")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Recognizer for BaiduRecognizer {
    async fn recognize(&self, evidence: &Evidence) -> Result<Recognition, RecognitionError> {
        if !self.config.is_configured() {
            warn!("recognition not configured, trusting evidence");
            return Ok(Recognition::Unverified);
        }
        let labels = match evidence.kind {
            MediaKind::Photo => self.classify_image(evidence).await?,
            MediaKind::Voice => self.transcribe(evidence).await?,
        };
        Ok(Recognition::Labels(labels))
    }
}

/// Parse a JSON body. Server errors become transport errors so they count
/// as transient.
async fn read_json(response: reqwest::Response) -> Result<Value, RecognitionError> {
    let response = if response.status().is_server_error() {
        response.error_for_status()?
    } else {
        response
    };
    Ok(response.json::<Value>().await?)
}

fn service_error(code: i64, body: &Value, message_field: &str) -> RecognitionError {
    RecognitionError::Service {
        code,
        message: body
            .get(message_field)
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}
