//! Local HTTP server (I): an HTML account-management UI plus JSON
//! endpoints for listing, adding, removing, and electing a default
//! account. Its own CSRF token gates the mutating routes.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use oauth2::{AuthorizationCode, CsrfToken, Scope, TokenResponse};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, Notify};

use crate::authorize::CALLBACK_PATH;
use crate::cancel::Cancellation;
use crate::credentials::ClientCredentials;
use crate::error::{Error, Result};
use crate::oauth_client::{OAuthClient, build_oauth_client};
use crate::path::Paths;
use crate::secret_store::{SecretStore, TokenValue};
use crate::service::{Service, scopes_for_services};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

struct ManageServerState {
    store: Arc<dyn SecretStore>,
    csrf_token: String,
    oauth_state: Mutex<Option<String>>,
    oauth_client: OAuthClient,
    scopes: Vec<String>,
    success_notify: Notify,
}

/// Start the manage server on an ephemeral loopback port, serve until the
/// timeout elapses, the caller cancels, or the first account is
/// successfully authorized - whichever comes first.
pub async fn run_manage_server(
    paths: &Paths,
    store: Arc<dyn SecretStore>,
    timeout: Duration,
    mut cancel: Cancellation,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");

    let creds = ClientCredentials::load(&paths.credentials_file())?;
    let oauth_client = build_oauth_client(&creds.client_id, &creds.client_secret, &redirect_uri)?;

    let mut csrf_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut csrf_bytes);

    let state = Arc::new(ManageServerState {
        store,
        csrf_token: hex::encode(csrf_bytes),
        oauth_state: Mutex::new(None),
        oauth_client,
        scopes: scopes_for_services(&Service::all()),
        success_notify: Notify::new(),
    });

    log::info!("manage server listening on http://127.0.0.1:{port}/");

    let shutdown_state = state.clone();
    let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
    let shutdown = async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => log::info!("manage server timed out"),
            _ = cancel.cancelled() => log::info!("manage server cancelled"),
            _ = shutdown_state.success_notify.notified() => log::info!("manage server shutting down after a successful authorization"),
        }
    };

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/accounts", get(handle_accounts))
        .route("/auth/start", get(handle_auth_start))
        .route(CALLBACK_PATH, get(handle_oauth_callback))
        .route("/set-default", post(handle_set_default))
        .route("/remove-account", post(handle_remove_account))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn csrf_ok(state: &ManageServerState, headers: &HeaderMap) -> bool {
    headers
        .get("X-CSRF-Token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|token| token == state.csrf_token)
}

async fn handle_index(State(state): State<Arc<ManageServerState>>) -> Html<String> {
    Html(index_page(&state.csrf_token))
}

async fn handle_accounts(
    State(state): State<Arc<ManageServerState>>,
) -> std::result::Result<axum::Json<serde_json::Value>, AppError> {
    let tokens = state.store.list_tokens()?;
    let pointer = state.store.get_default_account()?;

    let default_email = if !pointer.is_empty() && tokens.iter().any(|t| t.email == pointer) {
        pointer
    } else {
        tokens.first().map(|t| t.email.clone()).unwrap_or_default()
    };

    let accounts: Vec<_> = tokens
        .iter()
        .map(|t| {
            json!({
                "email": t.email,
                "services": t.services,
                "is_default": t.email == default_email,
            })
        })
        .collect();

    Ok(axum::Json(json!({ "accounts": accounts })))
}

async fn handle_auth_start(
    State(state): State<Arc<ManageServerState>>,
) -> impl IntoResponse {
    let mut request = state
        .oauth_client
        .authorize_url(CsrfToken::new_random)
        .add_extra_param("access_type", "offline")
        .add_extra_param("include_granted_scopes", "true");
    for scope in &state.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    let (url, csrf) = request.url();
    *state.oauth_state.lock().await = Some(csrf.secret().clone());
    Redirect::to(url.as_str())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
}

async fn handle_oauth_callback(
    State(state): State<Arc<ManageServerState>>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    if let Some(reason) = query.error {
        return (StatusCode::OK, Html(cancelled_page(&reason))).into_response();
    }

    let expected = state.oauth_state.lock().await.clone();
    match (&expected, &query.state) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => return (StatusCode::BAD_REQUEST, Html(error_page("state mismatch"))).into_response(),
    }

    let Some(code) = query.code else {
        return (StatusCode::BAD_REQUEST, Html(error_page("missing authorization code"))).into_response();
    };

    match exchange_and_store(&state, &code).await {
        Ok((email, services)) => {
            state.success_notify.notify_one();
            (StatusCode::OK, Html(success_page(&email, &services))).into_response()
        }
        Err(err) => {
            log::warn!("manage server token exchange failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(error_page(&err.to_string()))).into_response()
        }
    }
}

async fn exchange_and_store(
    state: &ManageServerState,
    code: &str,
) -> Result<(String, Vec<String>)> {
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let token_response = state
        .oauth_client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(&http_client)
        .await
        .map_err(|e| Error::OAuth(e.to_string()))?;

    let refresh_token = match token_response.refresh_token() {
        Some(rt) if !rt.secret().is_empty() => rt.secret().to_owned(),
        _ => return Err(Error::NoRefreshToken),
    };

    let email = fetch_email(&http_client, token_response.access_token().secret()).await?;
    let services: Vec<String> = Service::all().iter().map(|s| s.name().to_string()).collect();

    let value = TokenValue {
        refresh_token,
        services: services.clone(),
        scopes: state.scopes.clone(),
        created_at: chrono::Utc::now(),
    };
    state.store.set_token(&email, value)?;
    Ok((email, services))
}

/// The token exchange identifies the OAuth client, not the account; the
/// account's email is recovered from Google's userinfo endpoint with the
/// freshly minted access token.
async fn fetch_email(http_client: &reqwest::Client, access_token: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct UserInfo {
        email: Option<String>,
    }

    let info: UserInfo = http_client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(access_token)
        .send()
        .await?
        .json()
        .await?;

    info.email
        .ok_or_else(|| Error::OAuth("userinfo response carried no email".into()))
}

#[derive(Debug, Deserialize)]
struct EmailBody {
    email: String,
}

async fn handle_set_default(
    State(state): State<Arc<ManageServerState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<EmailBody>,
) -> StatusCode {
    if !csrf_ok(&state, &headers) {
        return StatusCode::FORBIDDEN;
    }
    if body.email.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match state.store.set_default_account(&body.email) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_remove_account(
    State(state): State<Arc<ManageServerState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<EmailBody>,
) -> StatusCode {
    if !csrf_ok(&state, &headers) {
        return StatusCode::FORBIDDEN;
    }
    if body.email.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match state.store.delete_token(&body.email) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

fn index_page(csrf_token: &str) -> String {
    format!(
        "<!doctype html><html><head><title>gog accounts</title></head><body>\
         <h1>Accounts</h1>\
         <script>const CSRF_TOKEN = \"{csrf_token}\";</script>\
         <div id=\"accounts\"></div>\
         </body></html>"
    )
}

fn success_page(email: &str, services: &[String]) -> String {
    format!(
        "<html><body><h1>Authorization successful</h1><p>{email} ({})</p></body></html>",
        services.join(", ")
    )
}

fn cancelled_page(reason: &str) -> String {
    format!("<html><body><h1>Authorization cancelled</h1><p>{reason}</p></body></html>")
}

fn error_page(reason: &str) -> String {
    format!("<html><body><h1>Authorization failed</h1><p>{reason}</p></body></html>")
}
