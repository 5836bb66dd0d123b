//! One-shot loopback listener that captures the authorization redirect

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::Url;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::config::CALLBACK_PATH;
use super::pkce::StateToken;
use crate::error::{AuthError, CallbackFailure, Result};

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication Successful</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1>Authentication successful</h1>
<p>Gmail and Calendar read access granted. You can close this window and return to the terminal.</p>
</body>
</html>"#;

const MAX_REQUEST_BYTES: usize = 8192;

/// Outcome of a single request to the callback path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// Code and matching state
    Success {
        /// Authorization code
        code: String,
        /// State echoed by the provider
        state: String,
    },
    /// The provider reported an error instead of a code
    ProviderError {
        /// `error`, followed by `error_description` when present
        reason: String,
    },
    /// No `code` parameter
    MissingCode,
    /// `state` parameter absent or different from the attempt's token
    StateMismatch,
}

impl CallbackResult {
    /// Classify the query parameters of a callback URL
    #[must_use]
    pub fn classify(url: &Url, expected_state: &StateToken) -> Self {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            let reason = match error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Self::ProviderError { reason };
        }
        let Some(code) = code.filter(|c| !c.is_empty()) else {
            return Self::MissingCode;
        };
        match state {
            Some(state) if expected_state.matches(&state) => Self::Success { code, state },
            _ => Self::StateMismatch,
        }
    }

    /// Turn the outcome into the authorization code, or a protocol error
    ///
    /// # Errors
    ///
    /// Returns `CallbackProtocol` for every outcome except `Success`.
    pub fn into_code(self) -> Result<String> {
        match self {
            Self::Success { code, .. } => Ok(code),
            Self::ProviderError { reason } => Err(CallbackFailure::ProviderDenied(reason).into()),
            Self::MissingCode => Err(CallbackFailure::MissingCode.into()),
            Self::StateMismatch => Err(CallbackFailure::StateMismatch.into()),
        }
    }
}

/// Loopback HTTP listener bound for one login attempt
///
/// [`wait`](Self::wait) consumes the listener, so the port and every accepted
/// connection are released before the outcome reaches the caller.
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    listener: TcpListener,
    listener_v6: Option<TcpListener>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>`, and `[::1]:<port>` when available; port 0 picks an ephemeral port
    ///
    /// Only the IPv4 bind decides success. The IPv6 bind is best-effort so a
    /// browser resolving `localhost` to `::1` first still lands here.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Bind` with a classified [`BindErrorKind`](crate::BindErrorKind).
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::bind(port, e))?;
        let port = listener.local_addr()?.port();
        let listener_v6 = match TcpListener::bind(("::1", port)).await {
            Ok(listener_v6) => Some(listener_v6),
            Err(e) => {
                tracing::debug!(port, "OAuth callback IPv6 bind skipped: {e}");
                None
            }
        };
        tracing::debug!(port, ipv6 = listener_v6.is_some(), "OAuth callback listener bound");
        Ok(Self {
            port,
            listener,
            listener_v6,
        })
    }

    /// Port the listener is bound to
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve requests until one reaches the callback path, then release the port
    ///
    /// Waits indefinitely. Requests to other paths get `404` and do not resolve.
    /// Connections still open when the outcome arrives are closed.
    pub async fn wait(self, expected_state: &StateToken) -> CallbackResult {
        let Self {
            port,
            listener,
            listener_v6,
        } = self;
        let expected = Arc::new(expected_state.clone());
        let (tx, mut rx) = mpsc::channel::<CallbackResult>(1);
        let mut connections = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                Some(outcome) = rx.recv() => break outcome,
                accepted = accept(&listener, listener_v6.as_ref()) => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(stream, peer, Arc::clone(&expected), tx.clone()));
                    }
                    Err(e) => tracing::warn!(port, "OAuth callback accept failed: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        connections.shutdown().await;
        drop(listener);
        drop(listener_v6);
        tracing::debug!(port, "OAuth callback listener released");
        outcome
    }
}

async fn accept(
    listener: &TcpListener,
    listener_v6: Option<&TcpListener>,
) -> io::Result<(TcpStream, SocketAddr)> {
    match listener_v6 {
        Some(listener_v6) => tokio::select! {
            accepted = listener.accept() => accepted,
            accepted = listener_v6.accept() => accepted,
        },
        None => listener.accept().await,
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    expected: Arc<StateToken>,
    tx: mpsc::Sender<CallbackResult>,
) {
    let request_line = match read_request_head(&mut stream).await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(%peer, "OAuth callback read failed: {e}");
            return;
        }
    };

    let (response, outcome) = route(&request_line, &expected);

    let _ = stream.write_all(response.render().as_bytes()).await;
    let _ = stream.shutdown().await;

    if let Some(outcome) = outcome {
        let _ = tx.send(outcome).await;
    }
}

/// Read the request line and drain the headers, capped at `MAX_REQUEST_BYTES`
///
/// `None` when the peer closes before sending anything.
async fn read_request_head(stream: &mut TcpStream) -> io::Result<Option<String>> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES as u64));

    let mut request_line = Vec::new();
    if reader.read_until(b'\n', &mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut header = Vec::new();
    loop {
        header.clear();
        let read = reader.read_until(b'\n', &mut header).await?;
        if read == 0 || header == b"\r\n" || header == b"\n" {
            break;
        }
    }

    Ok(Some(String::from_utf8_lossy(&request_line).into_owned()))
}

struct Response {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: String,
}

impl Response {
    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn render(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Map one raw HTTP request to a response and, for the callback path, an outcome
fn route(request: &str, expected: &StateToken) -> (Response, Option<CallbackResult>) {
    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    let url = match target
        .starts_with('/')
        .then(|| Url::parse(&format!("http://localhost{target}")).ok())
        .flatten()
    {
        Some(url) => url,
        None => return (Response::text(400, "Bad Request", "Malformed request"), None),
    };

    if url.path() != CALLBACK_PATH {
        return (Response::text(404, "Not Found", "Not found"), None);
    }
    if method != "GET" {
        return (
            Response::text(405, "Method Not Allowed", "Only GET is supported"),
            None,
        );
    }

    let outcome = CallbackResult::classify(&url, expected);
    let response = match &outcome {
        CallbackResult::Success { .. } => Response {
            status: 200,
            reason: "OK",
            content_type: "text/html; charset=utf-8",
            body: SUCCESS_HTML.to_string(),
        },
        CallbackResult::ProviderError { reason } => Response::text(
            400,
            "Bad Request",
            format!("Authorization failed: {reason}. Return to the terminal and retry."),
        ),
        CallbackResult::MissingCode => {
            Response::text(400, "Bad Request", "Missing code parameter")
        }
        CallbackResult::StateMismatch => Response::text(
            400,
            "Bad Request",
            "State mismatch. Restart the login from the terminal.",
        ),
    };
    (response, Some(outcome))
}
