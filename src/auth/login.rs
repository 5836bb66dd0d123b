//! Login state machine: pick a flow, collect a code, exchange it

use std::fmt;

use super::callback::CallbackListener;
use super::config::OAuthConfig;
use super::environment::{EnvironmentProbe, FlowMode};
use super::manual::ManualCodeCollector;
use super::pkce::{PkceChallenge, StateToken};
use super::token::{Credential, RefreshedToken, TokenClient};
use crate::error::Result;

/// Stages a login passes through, logged at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    /// Nothing decided yet
    Init,
    /// Flow mode chosen, fresh secrets minted
    ModeSelected(FlowMode),
    /// URL published, waiting on the browser or the operator
    AwaitingResponse(FlowMode),
    /// Trading the code for tokens
    Exchanging,
    /// Credential produced
    Done,
    /// Terminal failure
    Failed,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::ModeSelected(mode) => write!(f, "mode-selected({mode})"),
            Self::AwaitingResponse(mode) => write!(f, "awaiting-response({mode})"),
            Self::Exchanging => f.write_str("exchanging"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Secrets and URL for one authorization attempt; never reused
struct Attempt {
    pkce: PkceChallenge,
    state: StateToken,
    url: String,
}

impl Attempt {
    fn new(config: &OAuthConfig) -> Result<Self> {
        let pkce = PkceChallenge::generate();
        let state = StateToken::generate();
        let url = config
            .authorization_url(&pkce.challenge, state.as_str())?
            .to_string();
        Ok(Self { pkce, state, url })
    }
}

/// Sink for status lines meant for the operator
pub type ProgressSink<'a> = Option<&'a mut (dyn FnMut(&str) + Send)>;

fn report(progress: &mut ProgressSink<'_>, message: &str) {
    if let Some(sink) = progress.as_mut() {
        sink(message);
    }
}

/// Builder for [`LoginFlow`]
#[derive(Debug, Default)]
pub struct LoginFlowBuilder {
    config: Option<OAuthConfig>,
    probe: Option<EnvironmentProbe>,
    collector: Option<ManualCodeCollector>,
    http_client: Option<reqwest::Client>,
}

impl LoginFlowBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the OAuth configuration (default: [`OAuthConfig::default`])
    #[must_use]
    pub fn config(mut self, config: OAuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the environment probe (default: the running process)
    #[must_use]
    pub fn probe(mut self, probe: EnvironmentProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set where manual-flow instructions go and input comes from (default: terminal)
    #[must_use]
    pub fn manual_collector(mut self, collector: ManualCodeCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Reuse an HTTP client for token requests
    #[must_use]
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Build the login flow
    #[must_use]
    pub fn build(self) -> LoginFlow {
        let config = self.config.unwrap_or_default();
        LoginFlow {
            tokens: TokenClient::with_http_client(config, self.http_client.unwrap_or_default()),
            probe: self.probe.unwrap_or_else(EnvironmentProbe::from_process),
            collector: self.collector.unwrap_or_default(),
        }
    }
}

/// Environment-aware authorization code flow with PKCE
///
/// Tries the loopback redirect when the host looks like a desktop, and falls
/// back to copy/paste when the listener cannot bind or the host is remote.
#[derive(Debug)]
pub struct LoginFlow {
    tokens: TokenClient,
    probe: EnvironmentProbe,
    collector: ManualCodeCollector,
}

impl LoginFlow {
    /// Create a builder
    #[must_use]
    pub fn builder() -> LoginFlowBuilder {
        LoginFlowBuilder::new()
    }

    /// Get the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        self.tokens.config()
    }

    /// Flow mode the probe selects for this host
    #[must_use]
    pub fn flow_mode(&self) -> FlowMode {
        self.probe.flow_mode()
    }

    /// Run the login
    ///
    /// `url_sink` receives the authorization URL once per attempt (twice when
    /// the local listener cannot bind). `progress` receives status lines.
    ///
    /// # Errors
    ///
    /// - `EnvironmentMisconfigured` before any network activity
    /// - `CallbackProtocol` when the authorization response is rejected
    /// - `Cancelled` when the operator aborts the manual prompt
    /// - exchange errors from [`TokenClient::exchange`]
    pub async fn login(
        &mut self,
        url_sink: &mut (dyn FnMut(&str) + Send),
        mut progress: ProgressSink<'_>,
    ) -> Result<Credential> {
        let result = self.run(url_sink, &mut progress).await;
        match &result {
            Ok(_) => transition(LoginStage::Exchanging, LoginStage::Done),
            Err(e) => {
                tracing::debug!(stage = %LoginStage::Failed, "Login failed: {e}");
            }
        }
        result
    }

    async fn run(
        &mut self,
        url_sink: &mut (dyn FnMut(&str) + Send),
        progress: &mut ProgressSink<'_>,
    ) -> Result<Credential> {
        self.tokens.config().validate()?;

        let mode = self.probe.flow_mode();
        transition(LoginStage::Init, LoginStage::ModeSelected(mode));

        let local = match mode {
            FlowMode::Local => self.await_local(url_sink, progress).await?,
            FlowMode::Manual => None,
        };
        let (code, attempt) = match local {
            Some(received) => received,
            None => self.await_manual(url_sink, progress).await?,
        };

        report(progress, "Exchanging authorization code for tokens...");
        let credential = self.tokens.exchange(&code, &attempt.pkce.verifier).await?;
        drop(attempt);

        match credential.email.as_deref() {
            Some(email) => report(progress, &format!("Logged in as {email}")),
            None => report(progress, "Logged in"),
        }
        Ok(credential)
    }

    /// Local flow; `Ok(None)` means the listener could not bind
    async fn await_local(
        &mut self,
        url_sink: &mut (dyn FnMut(&str) + Send),
        progress: &mut ProgressSink<'_>,
    ) -> Result<Option<(String, Attempt)>> {
        let attempt = Attempt::new(self.tokens.config())?;
        url_sink(&attempt.url);

        let port = self.tokens.config().redirect_port;
        let listener = match CallbackListener::bind(port).await {
            Ok(listener) => listener,
            Err(e) if e.is_fallback_eligible() => {
                tracing::warn!("{e}; switching to manual login");
                report(
                    progress,
                    &format!("Port {port} is unavailable, switching to manual login"),
                );
                transition(
                    LoginStage::AwaitingResponse(FlowMode::Local),
                    LoginStage::ModeSelected(FlowMode::Manual),
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        transition(
            LoginStage::ModeSelected(FlowMode::Local),
            LoginStage::AwaitingResponse(FlowMode::Local),
        );
        report(
            progress,
            &format!("Waiting for the browser redirect on {}", self.config().redirect_uri()),
        );

        let code = listener.wait(&attempt.state).await.into_code()?;
        transition(LoginStage::AwaitingResponse(FlowMode::Local), LoginStage::Exchanging);
        Ok(Some((code, attempt)))
    }

    async fn await_manual(
        &mut self,
        url_sink: &mut (dyn FnMut(&str) + Send),
        progress: &mut ProgressSink<'_>,
    ) -> Result<(String, Attempt)> {
        let attempt = Attempt::new(self.tokens.config())?;
        url_sink(&attempt.url);

        transition(
            LoginStage::ModeSelected(FlowMode::Manual),
            LoginStage::AwaitingResponse(FlowMode::Manual),
        );
        report(progress, "Waiting for the redirect URL to be pasted");

        let code = self.collector.collect(&attempt.url, &attempt.state).await?;
        transition(LoginStage::AwaitingResponse(FlowMode::Manual), LoginStage::Exchanging);
        Ok((code, attempt))
    }

    /// Trade a refresh token for a new access token
    ///
    /// The caller keeps its refresh token; see [`Credential::apply_refresh`].
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentMisconfigured`, `RefreshFailed` or `InvalidResponse`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        self.tokens.config().validate()?;
        self.tokens.refresh(refresh_token).await
    }
}

fn transition(from: LoginStage, to: LoginStage) {
    tracing::debug!(%from, %to, "Login stage transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    fn manual_flow(config: OAuthConfig, input: &'static str) -> LoginFlow {
        LoginFlow::builder()
            .config(config)
            .probe(EnvironmentProbe::new([("SSH_CLIENT", "1.2.3.4 5 22")], "linux"))
            .manual_collector(ManualCodeCollector::new(input.as_bytes(), tokio::io::sink()))
            .build()
    }

    #[test]
    fn test_attempts_never_share_secrets() {
        let config = OAuthConfig::builder().client_id("id").client_secret("s").build();
        let first = Attempt::new(&config).unwrap();
        let second = Attempt::new(&config).unwrap();
        assert_ne!(first.state, second.state);
        assert_ne!(first.pkce.verifier, second.pkce.verifier);
        assert_ne!(first.url, second.url);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(
            LoginStage::ModeSelected(FlowMode::Manual).to_string(),
            "mode-selected(manual)"
        );
        assert_eq!(LoginStage::Exchanging.to_string(), "exchanging");
    }

    #[tokio::test]
    async fn test_login_rejects_missing_client_id_before_publishing_url() {
        let mut flow = manual_flow(OAuthConfig::default(), "code\n");
        let mut urls = Vec::new();
        let result = flow.login(&mut |url: &str| urls.push(url.to_string()), None).await;

        assert!(matches!(result, Err(AuthError::EnvironmentMisconfigured(_))));
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn test_manual_state_mismatch_is_terminal() {
        let config = OAuthConfig::builder().client_id("id").client_secret("s").build();
        let mut flow = manual_flow(
            config,
            "http://localhost:51122/oauth-callback?code=X&state=stale\n",
        );
        let mut urls = Vec::new();
        let result = flow.login(&mut |url: &str| urls.push(url.to_string()), None).await;

        assert!(matches!(
            result,
            Err(AuthError::CallbackProtocol(
                crate::error::CallbackFailure::StateMismatch
            ))
        ));
        assert_eq!(urls.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_requires_configuration() {
        let flow = manual_flow(OAuthConfig::default(), "");
        assert!(matches!(
            flow.refresh("r").await,
            Err(AuthError::EnvironmentMisconfigured(_))
        ));
    }
}
