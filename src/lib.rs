//! # google-readonly-auth
//!
//! OAuth 2.0 login for CLI agents that read Gmail and Google Calendar.
//! Async/await, tokio-based, works on desktops and over SSH.
//!
//! ## Quick Start
//!
//! ```no_run
//! use google_readonly_auth::{LoginFlow, OAuthConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut flow = LoginFlow::builder().config(OAuthConfig::from_env()?).build();
//!
//!     let mut status = |line: &str| eprintln!("{line}");
//!     let credential = flow
//!         .login(&mut |url: &str| println!("Open {url}"), Some(&mut status))
//!         .await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&credential)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Choosing a flow
//!
//! On a desktop the provider redirects the browser to a one-shot listener on
//! `http://localhost:51122/oauth-callback`. Over SSH, in containers and cloud
//! IDEs, on Linux without a display, and under WSL 2 the operator instead
//! pastes the final redirect URL back into the terminal. If the loopback port
//! is taken, the local flow falls back to the manual one.
//!
//! ## Refreshing
//!
//! ```no_run
//! # use google_readonly_auth::{Credential, LoginFlow};
//! # async fn example(flow: &LoginFlow, mut credential: Credential) -> google_readonly_auth::Result<()> {
//! if credential.is_expired() {
//!     let refreshed = flow.refresh(&credential.refresh).await?;
//!     credential.apply_refresh(refreshed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Events are zero-cost when no subscriber is attached. Tokens, codes and
//! verifiers are never logged.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, AuthError>`](Result). Only a
//! bind failure of the loopback listener is recovered internally.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod error;

pub use auth::{
    CallbackListener, CallbackResult, Credential, EnvironmentProbe, FlowMode, LoginFlow,
    LoginFlowBuilder, OAuthConfig, PkceChallenge, RefreshedToken, StateToken, TokenClient,
};
pub use error::{AuthError, BindErrorKind, CallbackFailure, Result};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
