//! The OAuth authorization engine: a loopback-redirect flow (default) and
//! a manual paste fallback, both bound to CSRF state and a timeout.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oauth2::{AuthorizationCode, CsrfToken, Scope, TokenResponse};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;

use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use crate::oauth_client::OAuthClient;

pub const CALLBACK_PATH: &str = "/oauth2/callback";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const POST_SUCCESS_DISPLAY: Duration = Duration::from_secs(30);
const READ_BUFFER: usize = 8192;

/// 32 random bytes, URL-safe base64 without padding. The spec's hard
/// requirement -- no `+`, `/`, or `=` in the result -- falls directly out
/// of that alphabet.
pub fn random_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

enum CallbackOutcome {
    Code(String),
    StateMismatch,
    Error(String),
}

/// Parameters shared by both flow variants.
pub struct AuthorizeRequest<'a> {
    pub client: &'a OAuthClient,
    pub scopes: &'a [String],
    pub force_consent: bool,
    pub manual: bool,
    pub timeout: Duration,
}

/// Run the authorize flow and return the granted refresh token.
pub async fn authorize(req: AuthorizeRequest<'_>, cancel: Cancellation) -> Result<String> {
    if req.scopes.is_empty() {
        return Err(Error::MissingScopes);
    }
    let timeout = if req.timeout.is_zero() {
        DEFAULT_TIMEOUT
    } else {
        req.timeout
    };

    if req.manual {
        authorize_manual(req.client, req.scopes, req.force_consent, timeout, cancel).await
    } else {
        authorize_loopback(req.client, req.scopes, req.force_consent, timeout, cancel).await
    }
}

fn auth_url(client: &OAuthClient, scopes: &[String], force_consent: bool) -> (Url, CsrfToken) {
    let mut request = client
        .authorize_url(CsrfToken::new_random)
        .add_extra_param("access_type", "offline")
        .add_extra_param("include_granted_scopes", "true");
    if force_consent {
        request = request.add_extra_param("prompt", "consent");
    }
    for scope in scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    request.url()
}

async fn authorize_loopback(
    client: &OAuthClient,
    scopes: &[String],
    force_consent: bool,
    timeout: Duration,
    mut cancel: Cancellation,
) -> Result<String> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");

    let client = client.clone().set_redirect_uri(oauth2::RedirectUrl::new(redirect_uri)?);
    let (auth_url, csrf_token) = auth_url(&client, scopes, force_consent);

    eprintln!("Open this URL in your browser to authorize:\n{auth_url}");
    if let Err(err) = open_browser(auth_url.as_str()) {
        log::warn!("could not open browser automatically: {err}");
    }

    let (result_tx, mut result_rx) = mpsc::channel::<CallbackOutcome>(1);
    let expected_state = csrf_token.secret().clone();
    let serve_task = tokio::spawn(serve_loopback(listener, expected_state, result_tx));

    let outcome = tokio::select! {
        Some(outcome) = result_rx.recv() => outcome,
        _ = tokio::time::sleep(timeout) => {
            serve_task.abort();
            return Err(Error::Cancelled("authorize timed out waiting for the callback".into()));
        }
        _ = cancel.cancelled() => {
            serve_task.abort();
            return Err(Error::Cancelled("authorize was cancelled".into()));
        }
    };

    let code = match outcome {
        CallbackOutcome::Code(code) => code,
        CallbackOutcome::StateMismatch => {
            serve_task.abort();
            return Err(Error::StateMismatch);
        }
        CallbackOutcome::Error(reason) => {
            serve_task.abort();
            return Err(Error::AuthorizationDenied(reason));
        }
    };

    let refresh_token = exchange_code(&client, &code).await?;

    // Give the success page a chance to render before tearing the
    // listener down; still interruptible.
    tokio::select! {
        _ = tokio::time::sleep(POST_SUCCESS_DISPLAY) => {}
        _ = cancel.cancelled() => {}
    }
    serve_task.abort();

    Ok(refresh_token)
}

async fn serve_loopback(
    listener: TcpListener,
    expected_state: String,
    result_tx: mpsc::Sender<CallbackOutcome>,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("loopback listener accept failed: {err}");
                return;
            }
        };
        if let Err(err) = handle_connection(stream, &expected_state, &result_tx).await {
            log::debug!("loopback callback connection error: {err}");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    expected_state: &str,
    result_tx: &mpsc::Sender<CallbackOutcome>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain remaining header lines; the callback never carries a body.
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let target = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let (status_line, body) = match Url::parse(&format!("http://localhost{target}")) {
        Ok(url) if url.path() == CALLBACK_PATH => {
            dispatch_callback(&url, expected_state, result_tx).await
        }
        _ => ("HTTP/1.1 404 Not Found", not_found_page()),
    };

    let response = format!(
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn dispatch_callback(
    url: &Url,
    expected_state: &str,
    result_tx: &mpsc::Sender<CallbackOutcome>,
) -> (&'static str, String) {
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

    if let Some(reason) = params.get("error") {
        let _ = result_tx.try_send(CallbackOutcome::Error(reason.clone()));
        return ("HTTP/1.1 200 OK", cancelled_page());
    }

    if let Some(state) = params.get("state") {
        if state != expected_state {
            let _ = result_tx.try_send(CallbackOutcome::StateMismatch);
            return ("HTTP/1.1 400 Bad Request", error_page("state mismatch"));
        }
    }

    match params.get("code") {
        Some(code) => {
            let _ = result_tx.try_send(CallbackOutcome::Code(code.clone()));
            ("HTTP/1.1 200 OK", success_page())
        }
        None => {
            let _ = result_tx.try_send(CallbackOutcome::Error("missing code".into()));
            ("HTTP/1.1 400 Bad Request", error_page("missing authorization code"))
        }
    }
}

async fn authorize_manual(
    client: &OAuthClient,
    scopes: &[String],
    force_consent: bool,
    timeout: Duration,
    mut cancel: Cancellation,
) -> Result<String> {
    let client = client
        .clone()
        .set_redirect_uri(oauth2::RedirectUrl::new("http://localhost:1".into())?);
    let (auth_url, csrf_token) = auth_url(&client, scopes, force_consent);

    eprintln!("Open this URL in your browser to authorize:\n{auth_url}");
    eprintln!("After approving, paste the full URL your browser was redirected to:");

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    let read = async {
        let n = stdin.read_line(&mut line).await?;
        Ok::<_, std::io::Error>(n)
    };

    let n = tokio::select! {
        result = read => result?,
        _ = tokio::time::sleep(timeout) => {
            return Err(Error::Cancelled("authorize timed out waiting for input".into()));
        }
        _ = cancel.cancelled() => {
            return Err(Error::Cancelled("authorize was cancelled".into()));
        }
    };

    if n == 0 {
        return Err(Error::Cancelled("authorize cancelled: no input (EOF)".into()));
    }

    let pasted = line.trim();
    let url = Url::parse(pasted).map_err(Error::Url)?;
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

    if let Some(state) = params.get("state") {
        if state != csrf_token.secret() {
            return Err(Error::StateMismatch);
        }
    }

    let code = params.get("code").ok_or(Error::MissingCode)?;
    exchange_code(&client, code).await
}

pub(crate) async fn exchange_code(client: &OAuthClient, code: &str) -> Result<String> {
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let token_response = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(&http_client)
        .await
        .map_err(|e| Error::OAuth(e.to_string()))?;

    match token_response.refresh_token() {
        Some(refresh) if !refresh.secret().is_empty() => Ok(refresh.secret().to_owned()),
        _ => Err(Error::NoRefreshToken),
    }
}

#[cfg(unix)]
fn open_browser(url: &str) -> std::io::Result<()> {
    let command = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    std::process::Command::new(command).arg(url).spawn()?;
    Ok(())
}

#[cfg(windows)]
fn open_browser(url: &str) -> std::io::Result<()> {
    std::process::Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url])
        .spawn()?;
    Ok(())
}

fn success_page() -> String {
    "<html><body><h1>Authorization successful</h1><p>You can close this tab.</p></body></html>"
        .to_string()
}

fn cancelled_page() -> String {
    "<html><body><h1>Authorization cancelled</h1></body></html>".to_string()
}

fn error_page(reason: &str) -> String {
    format!("<html><body><h1>Authorization failed</h1><p>{reason}</p></body></html>")
}

fn not_found_page() -> String {
    "<html><body><h1>404 Not Found</h1></body></html>".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_random_and_url_safe() {
        let a = random_state();
        let b = random_state();
        assert_ne!(a, b);
        assert!(!a.is_empty());
        for forbidden in ['+', '/', '='] {
            assert!(!a.contains(forbidden));
        }
    }

    #[test]
    fn auth_url_sets_offline_and_granted_scopes() {
        let client = crate::oauth_client::build_oauth_client("id", "secret", "http://127.0.0.1:1/oauth2/callback").unwrap();
        let (url, _state) = auth_url(&client, &["scope-a".to_string()], false);
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(query.get("include_granted_scopes").map(String::as_str), Some("true"));
        assert!(!query.contains_key("prompt"));
    }

    #[test]
    fn auth_url_adds_prompt_consent_when_forced() {
        let client = crate::oauth_client::build_oauth_client("id", "secret", "http://127.0.0.1:1/oauth2/callback").unwrap();
        let (url, _state) = auth_url(&client, &["scope-a".to_string()], true);
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("prompt").map(String::as_str), Some("consent"));
    }

    #[tokio::test]
    async fn loopback_state_mismatch_surfaces_state_mismatch_error() {
        let (result_tx, mut result_rx) = mpsc::channel::<CallbackOutcome>(1);
        let params: std::collections::HashMap<String, String> =
            [("state".to_string(), "wrong".to_string()), ("code".to_string(), "abc".to_string())]
                .into_iter()
                .collect();
        let url = Url::parse_with_params("http://localhost/oauth2/callback", &params).unwrap();

        dispatch_callback(&url, "expected", &result_tx).await;

        let outcome = result_rx.recv().await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::StateMismatch));
    }

    #[tokio::test]
    async fn missing_scopes_errors() {
        let client = crate::oauth_client::build_oauth_client("id", "secret", "http://127.0.0.1:1/oauth2/callback").unwrap();
        let req = AuthorizeRequest {
            client: &client,
            scopes: &[],
            force_consent: false,
            manual: false,
            timeout: Duration::ZERO,
        };
        let err = authorize(req, Cancellation::never()).await.unwrap_err();
        assert!(matches!(err, Error::MissingScopes));
    }
}
