//! Access-token cache with an explicit expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Holds at most one token. A token is handed out until `refresh_margin`
/// before its expiry; after that callers must fetch a new one.
#[derive(Debug, Clone)]
pub struct TokenCache {
    token: Option<AccessToken>,
    /// When the cached token stops being handed out.
    refresh_at: Option<DateTime<Utc>>,
    refresh_margin: Duration,
}

impl TokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            token: None,
            refresh_at: None,
            refresh_margin,
        }
    }

    /// Cached token if it is still usable at `now`.
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.token, self.refresh_at) {
            (Some(token), Some(refresh_at)) if now < refresh_at => Some(token.token.as_str()),
            _ => None,
        }
    }

    /// Cache a token that the service says lives `expires_in_secs` from `now`.
    ///
    /// Tokens living no longer than the margin are used until their real
    /// expiry instead.
    pub fn store(&mut self, token: String, expires_in_secs: i64, now: DateTime<Utc>) -> &AccessToken {
        let lifetime = Duration::seconds(expires_in_secs.clamp(0, 10 * 365 * 24 * 3600));
        let expires_at = now + lifetime;
        self.refresh_at = Some(if lifetime > self.refresh_margin {
            expires_at - self.refresh_margin
        } else {
            expires_at
        });
        self.token.insert(AccessToken { token, expires_at })
    }

    pub fn invalidate(&mut self) {
        self.token = None;
        self.refresh_at = None;
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap()
    }

    #[test]
    fn token_is_refreshed_a_margin_before_expiry() {
        let mut cache = TokenCache::new(Duration::days(1));
        // Baidu tokens live 30 days.
        cache.store("abc".into(), 30 * 24 * 3600, t0());
        assert_eq!(cache.valid_token(t0()), Some("abc"));
        assert_eq!(cache.valid_token(t0() + Duration::days(28)), Some("abc"));
        assert_eq!(cache.valid_token(t0() + Duration::days(29)), None);
    }

    #[test]
    fn short_lived_token_is_used_until_real_expiry() {
        let mut cache = TokenCache::new(Duration::days(1));
        cache.store("short".into(), 3600, t0());
        assert_eq!(cache.valid_token(t0() + Duration::minutes(59)), Some("short"));
        assert_eq!(cache.valid_token(t0() + Duration::minutes(60)), None);
    }

    #[test]
    fn empty_and_invalidated_caches_have_no_token() {
        let mut cache = TokenCache::new(Duration::seconds(60));
        assert_eq!(cache.valid_token(t0()), None);
        cache.store("abc".into(), 3600, t0());
        cache.invalidate();
        assert_eq!(cache.valid_token(t0()), None);
    }
}
