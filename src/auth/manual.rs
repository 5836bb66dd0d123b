//! Copy/paste fallback for hosts where the loopback redirect cannot land

use reqwest::Url;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::pkce::StateToken;
use crate::error::{AuthError, CallbackFailure, Result};

/// Code and state recovered from operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualCode {
    /// Authorization code
    pub code: String,
    /// State to verify against the attempt
    pub state: String,
}

/// Parse what the operator pasted back
///
/// A full redirect URL yields its `code` and `state` parameters; a missing
/// `state` is replaced by `expected_state`. Anything that does not parse as a
/// URL is taken as the bare code.
///
/// # Errors
///
/// Returns `CallbackProtocol(MissingCode)` if a URL carries no `code`.
pub fn parse_manual_input(input: &str, expected_state: &StateToken) -> Result<ManualCode> {
    let input = input.trim();

    let Ok(url) = Url::parse(input) else {
        return Ok(ManualCode {
            code: input.to_string(),
            state: expected_state.to_string(),
        });
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    let code = code
        .filter(|c| !c.is_empty())
        .ok_or(CallbackFailure::MissingCode)?;
    Ok(ManualCode {
        code,
        state: state.unwrap_or_else(|| expected_state.to_string()),
    })
}

type Input = Box<dyn AsyncBufRead + Unpin + Send>;
type Output = Box<dyn AsyncWrite + Unpin + Send>;

/// Prompts the operator and reads the pasted redirect URL
pub struct ManualCodeCollector {
    input: Input,
    output: Output,
}

impl std::fmt::Debug for ManualCodeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualCodeCollector").finish_non_exhaustive()
    }
}

impl Default for ManualCodeCollector {
    fn default() -> Self {
        Self::stdio()
    }
}

impl ManualCodeCollector {
    /// Collector over arbitrary input and output streams
    pub fn new(
        input: impl AsyncBufRead + Unpin + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// Collector over the terminal (instructions go to stderr)
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }

    /// Print instructions for `auth_url`, read one line, and verify its state
    ///
    /// # Errors
    ///
    /// - `Cancelled` on blank input, end of input, or `cancel`
    /// - `CallbackProtocol(MissingCode)` for a URL without `code`
    /// - `CallbackProtocol(StateMismatch)` when the state belongs to another attempt
    pub async fn collect(&mut self, auth_url: &str, expected_state: &StateToken) -> Result<String> {
        let instructions = format!(
            "\nThis machine cannot receive the browser redirect, so finish the login by hand:\n\
             \n  1. Open this URL in a browser on any device:\n\
             \n     {auth_url}\n\
             \n  2. Sign in and approve read access to Gmail and Calendar\n\
             \n  3. The browser then lands on a localhost page that fails to load. That is expected.\n\
             \n     Copy the full URL from its address bar\n\
             \n  4. Paste it below (or 'cancel' to abort)\n\n"
        );
        self.say(&instructions).await?;
        self.say("Redirect URL or code: ").await?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).await?;
        let line = line.trim();
        if read == 0 || line.is_empty() || line.eq_ignore_ascii_case("cancel") {
            return Err(AuthError::Cancelled);
        }

        let parsed = parse_manual_input(line, expected_state)?;
        if !expected_state.matches(&parsed.state) {
            return Err(CallbackFailure::StateMismatch.into());
        }
        Ok(parsed.code)
    }
}
