//! Provider configuration and authorization URL construction

use reqwest::Url;
use typed_builder::TypedBuilder;

use crate::error::{AuthError, Result};

/// Google's authorization endpoint
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google's token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Google's userinfo endpoint, used to recover the account email
pub const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
/// Fixed loopback port the redirect URI points at
pub const DEFAULT_REDIRECT_PORT: u16 = 51122;
/// Path the provider redirects to on the loopback listener
pub const CALLBACK_PATH: &str = "/oauth-callback";

/// Read-only mail, read-only calendar, and the account identity
pub const SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Environment variable holding the OAuth client id
pub const CLIENT_ID_ENV: &str = "GOOGLE_OAUTH_CLIENT_ID";
/// Environment variable holding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "GOOGLE_OAUTH_CLIENT_SECRET";
/// Environment variable overriding the loopback port
pub const REDIRECT_PORT_ENV: &str = "GOOGLE_OAUTH_REDIRECT_PORT";

/// OAuth client configuration
///
/// Endpoints default to Google's. Tests point them at a mock server.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for OAuthConfig"),
    builder_type(doc = "Builder for OAuthConfig", vis = "pub"),
    build_method(doc = "Build the OAuthConfig")
)]
pub struct OAuthConfig {
    /// OAuth client ID
    #[builder(default, setter(into))]
    pub client_id: String,

    /// OAuth client secret (desktop clients still send one)
    #[builder(default, setter(into))]
    pub client_secret: String,

    /// Authorization endpoint URL
    #[builder(default = DEFAULT_AUTH_URL.to_string(), setter(into))]
    pub auth_url: String,

    /// Token endpoint URL
    #[builder(default = DEFAULT_TOKEN_URL.to_string(), setter(into))]
    pub token_url: String,

    /// Userinfo endpoint URL
    #[builder(default = DEFAULT_USERINFO_URL.to_string(), setter(into))]
    pub userinfo_url: String,

    /// Loopback port for the local flow
    #[builder(default = DEFAULT_REDIRECT_PORT)]
    pub redirect_port: u16,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OAuthConfig {
    /// Load client credentials from the process environment
    ///
    /// Missing credentials are left empty and reported by [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentMisconfigured` if the port override is not a valid port.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentMisconfigured` if the port override is not a valid port.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let redirect_port = match lookup(REDIRECT_PORT_ENV) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AuthError::misconfigured(format!("{REDIRECT_PORT_ENV}={raw} is not a valid port"))
            })?,
            None => DEFAULT_REDIRECT_PORT,
        };

        Ok(Self::builder()
            .client_id(lookup(CLIENT_ID_ENV).unwrap_or_default())
            .client_secret(lookup(CLIENT_SECRET_ENV).unwrap_or_default())
            .redirect_port(redirect_port)
            .build())
    }

    /// Check that client credentials are present
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentMisconfigured` naming the missing variable.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::misconfigured(format!("{CLIENT_ID_ENV} is not set")));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::misconfigured(format!(
                "{CLIENT_SECRET_ENV} is not set"
            )));
        }
        Ok(())
    }

    /// Redirect URI registered for the loopback listener
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.redirect_port)
    }

    /// Space-joined scope list
    #[must_use]
    pub fn scope(&self) -> String {
        SCOPES.join(" ")
    }

    /// Build the authorization request URL for one attempt
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentMisconfigured` if the authorization endpoint is not a URL.
    pub fn authorization_url(&self, code_challenge: &str, state: &str) -> Result<Url> {
        let redirect_uri = self.redirect_uri();
        let scope = self.scope();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ];

        Url::parse_with_params(&self.auth_url, &params).map_err(|e| {
            AuthError::misconfigured(format!(
                "authorization endpoint {} is not a valid URL: {e}",
                self.auth_url
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_oauth_config_default() {
        let config = OAuthConfig::default();
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.redirect_port, DEFAULT_REDIRECT_PORT);
        assert_eq!(config.redirect_uri(), "http://localhost:51122/oauth-callback");
    }

    #[test]
    fn test_authorization_url_params() {
        let config = OAuthConfig::builder().client_id("client-123").build();
        let url = config.authorization_url("chal", "st").unwrap();
        let params = query(&url);

        assert!(url.as_str().starts_with(DEFAULT_AUTH_URL));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:51122/oauth-callback");
        assert_eq!(params["code_challenge"], "chal");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], "st");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["scope"].split(' ').count(), 4);
        assert!(params["scope"].contains("gmail.readonly"));
        assert!(params["scope"].contains("calendar.readonly"));
    }

    #[test]
    fn test_validate_requires_client_credentials() {
        let missing_id = OAuthConfig::builder().client_secret("s").build();
        assert!(matches!(
            missing_id.validate(),
            Err(AuthError::EnvironmentMisconfigured(msg)) if msg.contains(CLIENT_ID_ENV)
        ));

        let missing_secret = OAuthConfig::builder().client_id("id").build();
        assert!(matches!(
            missing_secret.validate(),
            Err(AuthError::EnvironmentMisconfigured(msg)) if msg.contains(CLIENT_SECRET_ENV)
        ));

        let complete = OAuthConfig::builder().client_id("id").client_secret("s").build();
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars = HashMap::from([
            (CLIENT_ID_ENV, "id"),
            (CLIENT_SECRET_ENV, "secret"),
            (REDIRECT_PORT_ENV, "8085"),
        ]);
        let config = OAuthConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.client_id, "id");
        assert_eq!(config.client_secret, "secret");
        assert_eq!(config.redirect_uri(), "http://localhost:8085/oauth-callback");
    }

    #[test]
    fn test_from_lookup_rejects_bad_port() {
        let result = OAuthConfig::from_lookup(|k| (k == REDIRECT_PORT_ENV).then(|| "http".into()));
        assert!(matches!(result, Err(AuthError::EnvironmentMisconfigured(_))));
    }
}
