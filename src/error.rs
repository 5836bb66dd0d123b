//! Error types for the login flow

use std::fmt;

use thiserror::Error;

/// Why a local port could not be bound for the callback listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindErrorKind {
    /// Another process (or another login attempt) already holds the port
    AddressInUse,
    /// The process may not listen on this port
    PermissionDenied,
    /// Any other listen failure
    Other,
}

impl BindErrorKind {
    /// Classify an I/O error reported by the listen primitive
    #[must_use]
    pub fn classify(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AddrInUse => Self::AddressInUse,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for BindErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressInUse => f.write_str("address already in use"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::Other => f.write_str("listen failed"),
        }
    }
}

/// A protocol-level failure of the authorization response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackFailure {
    /// The provider redirected back with an `error` parameter
    #[error("provider returned an error: {0}")]
    ProviderDenied(String),

    /// The response carried no authorization code
    #[error("Missing code parameter")]
    MissingCode,

    /// The response `state` does not belong to this attempt
    #[error("state mismatch, the authorization response does not belong to this login attempt")]
    StateMismatch,
}

/// Main error type for login and token operations
#[derive(Error, Debug)]
pub enum AuthError {
    /// Client credentials are not configured
    #[error("OAuth client is not configured: {0}")]
    EnvironmentMisconfigured(String),

    /// The callback listener could not bind its port
    #[error("Could not listen on localhost:{port} ({kind}): {source}")]
    Bind {
        /// Port that was requested
        port: u16,
        /// Classified failure
        kind: BindErrorKind,
        /// Underlying listen error
        #[source]
        source: std::io::Error,
    },

    /// The authorization response was rejected
    #[error("Authorization failed: {0}")]
    CallbackProtocol(#[from] CallbackFailure),

    /// The token endpoint rejected the authorization code
    #[error("Token exchange failed (HTTP {status}): {body}")]
    ExchangeFailed {
        /// HTTP status returned by the provider
        status: u16,
        /// Raw response body, kept for diagnosis
        body: String,
    },

    /// The token endpoint rejected the refresh token
    #[error("Token refresh failed (HTTP {status}): {body}")]
    RefreshFailed {
        /// HTTP status returned by the provider
        status: u16,
        /// Raw response body, kept for diagnosis
        body: String,
    },

    /// The exchange succeeded but no refresh token was issued
    #[error(
        "No refresh token was returned. Google only issues one when consent is granted again.\n\
         Revoke this app's access at https://myaccount.google.com/permissions and log in again."
    )]
    MissingRefreshToken,

    /// The provider answered with something that could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The operator aborted the manual prompt
    #[error("Authentication cancelled by user")]
    Cancelled,

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for login operations
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Create a misconfiguration error carrying setup instructions
    pub fn misconfigured(what: impl Into<String>) -> Self {
        Self::EnvironmentMisconfigured(format!(
            "{}\n\
             Create an OAuth client of type \"Desktop app\" in the Google Cloud console, then:\n\
             export GOOGLE_OAUTH_CLIENT_ID=<client id>\n\
             export GOOGLE_OAUTH_CLIENT_SECRET=<client secret>",
            what.into()
        ))
    }

    /// Create a bind error from the listen failure
    #[must_use]
    pub fn bind(port: u16, source: std::io::Error) -> Self {
        Self::Bind {
            port,
            kind: BindErrorKind::classify(&source),
            source,
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether the local flow may fall back to the manual flow after this error
    #[must_use]
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}
