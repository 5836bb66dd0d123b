//! Credential record and the token endpoint client

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Subtracted from every provider lifetime so tokens count as expired early
pub const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TTL_SECS: u64 = 3600;

/// Current time in epoch milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Absolute expiry for a token issued at `now_ms` with a `ttl_secs` lifetime
#[must_use]
pub fn expires_at(now_ms: i64, ttl_secs: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_ms.saturating_add(ttl_ms) - EXPIRY_SKEW_MS
}

/// Tokens produced by a completed login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API calls
    pub access: String,
    /// Refresh token; Google does not rotate it on refresh
    pub refresh: String,
    /// Epoch milliseconds after which `access` should be treated as expired
    pub expires: i64,
    /// Account email, when the userinfo lookup succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Credential {
    /// Whether the access token should be refreshed before use
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires
    }

    /// Take a refreshed access token, keeping `refresh` and `email`
    pub fn apply_refresh(&mut self, refreshed: RefreshedToken) {
        self.access = refreshed.access;
        self.expires = refreshed.expires;
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access)
    }
}

/// Access token produced by a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedToken {
    /// New access token
    pub access: String,
    /// Epoch milliseconds, skew applied
    pub expires: i64,
}

/// Success response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Client for the token and userinfo endpoints
#[derive(Debug, Clone)]
pub struct TokenClient {
    config: OAuthConfig,
    http_client: reqwest::Client,
}

impl TokenClient {
    /// Create a client with its own HTTP connection pool
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    /// Create a client over an existing HTTP client
    #[must_use]
    pub fn with_http_client(config: OAuthConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Get the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<(reqwest::StatusCode, String)> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    fn parse_token_response(body: &str) -> Result<TokenResponse> {
        serde_json::from_str(body).map_err(|e| {
            AuthError::invalid_response(format!("Failed to parse token response: {e}"))
        })
    }

    /// Exchange an authorization code for a full credential
    ///
    /// # Errors
    ///
    /// - `ExchangeFailed` on a non-success status, with the provider's body
    /// - `MissingRefreshToken` when the response has no refresh token
    /// - `InvalidResponse` when the body is not a token response
    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<Credential> {
        let redirect_uri = self.config.redirect_uri();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];

        let (status, body) = self.post_form(&form).await?;
        if !status.is_success() {
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token = Self::parse_token_response(&body)?;
        let refresh = token
            .refresh_token
            .filter(|r| !r.is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;
        let expires = expires_at(now_millis(), token.expires_in.unwrap_or(DEFAULT_TTL_SECS));
        let email = self.lookup_email(&token.access_token).await;

        tracing::debug!(has_email = email.is_some(), "Authorization code exchanged");
        Ok(Credential {
            access: token.access_token,
            refresh,
            expires,
            email,
        })
    }

    /// Trade a refresh token for a new access token
    ///
    /// # Errors
    ///
    /// - `RefreshFailed` on a non-success status, with the provider's body
    /// - `InvalidResponse` when the body is not a token response
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let (status, body) = self.post_form(&form).await?;
        if !status.is_success() {
            return Err(AuthError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token = Self::parse_token_response(&body)?;
        tracing::debug!("Access token refreshed");
        Ok(RefreshedToken {
            access: token.access_token,
            expires: expires_at(now_millis(), token.expires_in.unwrap_or(DEFAULT_TTL_SECS)),
        })
    }

    /// Best-effort email lookup; every failure yields `None`
    async fn lookup_email(&self, access_token: &str) -> Option<String> {
        let response = match self
            .http_client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Userinfo lookup rejected");
                return None;
            }
            Err(e) => {
                tracing::debug!("Userinfo lookup failed: {e}");
                return None;
            }
        };

        match response.json::<UserInfo>().await {
            Ok(info) => info.email,
            Err(e) => {
                tracing::debug!("Userinfo response unreadable: {e}");
                None
            }
        }
    }
}
