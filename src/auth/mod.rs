//! OAuth login for read-only Google mail and calendar access
//!
//! Implements the Authorization Code flow with PKCE (Proof Key for Code
//! Exchange) and picks how the authorization response gets back to the CLI:
//!
//! 1. Probe the host: desktop, or remote/headless ([`EnvironmentProbe`])
//! 2. Mint a fresh verifier, challenge and state ([`PkceChallenge`], [`StateToken`])
//! 3. Hand the authorization URL to the caller to display or open
//! 4. Receive the code on a loopback listener ([`CallbackListener`]) or from a
//!    pasted redirect URL ([`ManualCodeCollector`])
//! 5. Exchange code + verifier for tokens ([`TokenClient`])
//!
//! If the loopback port cannot be bound, the flow starts over in manual mode
//! with new secrets and a new URL.
//!
//! # Example
//!
//! ```no_run
//! use google_readonly_auth::auth::{LoginFlow, OAuthConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flow = LoginFlow::builder().config(OAuthConfig::from_env()?).build();
//!
//!     let credential = flow
//!         .login(&mut |url: &str| println!("Open: {url}"), None)
//!         .await?;
//!
//!     println!("Token expires at: {}", credential.expires);
//!     Ok(())
//! }
//! ```
//!
//! # Storage
//!
//! Nothing here persists tokens. [`Credential`] is serializable so the
//! caller's credential store can keep it.

mod callback;
mod config;
mod environment;
mod login;
mod manual;
mod pkce;
mod token;

pub use callback::{CallbackListener, CallbackResult};
pub use config::{
    CALLBACK_PATH, CLIENT_ID_ENV, CLIENT_SECRET_ENV, DEFAULT_AUTH_URL, DEFAULT_REDIRECT_PORT,
    DEFAULT_TOKEN_URL, DEFAULT_USERINFO_URL, OAuthConfig, OAuthConfigBuilder, REDIRECT_PORT_ENV,
    SCOPES,
};
pub use environment::{EnvironmentProbe, FlowMode};
pub use login::{LoginFlow, LoginFlowBuilder, LoginStage, ProgressSink};
pub use manual::{ManualCode, ManualCodeCollector, parse_manual_input};
pub use pkce::{PkceChallenge, StateToken};
pub use token::{Credential, EXPIRY_SKEW_MS, RefreshedToken, TokenClient, expires_at, now_millis};
