//! Builds an authenticated HTTP client for a `(service, account)` pair by
//! composing the secret store (D), the retry transport (F), and a lazy
//! token source wrapping the `oauth2` crate.
//!
//! ```rust,no_run
//! # use gog_core::oauth_client::client_for_account;
//! # use gog_core::{path::Paths, secret_store::KeyringStore, service::Service};
//! # async fn example() -> gog_core::Result<()> {
//! let paths = Paths::resolve()?;
//! let store = KeyringStore::new();
//! let client = client_for_account(&paths, &store, Service::Gmail, "user@example.com").await?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RedirectUrl,
    RefreshToken, TokenResponse, TokenUrl,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::breaker::CircuitBreaker;
use crate::cancel::Cancellation;
use crate::credentials::ClientCredentials;
use crate::error::{Error, Result};
use crate::path::Paths;
use crate::secret_store::{SecretStore, normalize_email};
use crate::service::Service;
use crate::transport::RetryTransport;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const REFRESH_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const OUTER_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(30);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A fully-configured `BasicClient`, pointed at Google's OAuth endpoints.
pub type OAuthClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Build an `OAuthClient` for `client_id`/`client_secret`, redirecting to
/// `redirect_url` (unused by the refresh grant, but required by the
/// typestate builder).
pub fn build_oauth_client(
    client_id: &str,
    client_secret: &str,
    redirect_url: &str,
) -> Result<OAuthClient> {
    let client = BasicClient::new(ClientId::new(client_id.to_string()))
        .set_client_secret(ClientSecret::new(client_secret.to_string()))
        .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
        .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
        .set_redirect_uri(RedirectUrl::new(redirect_url.to_string())?)
        .set_auth_type(AuthType::RequestBody);
    Ok(client)
}

/// Lazily mints and refreshes an access token from a stored refresh
/// token. Refreshes are serialized through an async mutex so concurrent
/// callers never double-refresh; reads of an unexpired cached token never
/// block on it.
pub struct TokenSource {
    client: OAuthClient,
    refresh_token: Mutex<String>,
    cached: Mutex<Option<(String, Instant)>>,
    refresh_client: reqwest::Client,
}

impl TokenSource {
    pub fn new(client: OAuthClient, refresh_token: String) -> Result<Self> {
        let refresh_client = reqwest::Client::builder()
            .timeout(REFRESH_CLIENT_TIMEOUT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;
        Ok(TokenSource {
            client,
            refresh_token: Mutex::new(refresh_token),
            cached: Mutex::new(None),
            refresh_client,
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expiry)) = cached.as_ref() {
            if *expiry > Instant::now() + EXPIRY_SAFETY_MARGIN {
                return Ok(token.clone());
            }
        }

        let refresh_token = self.refresh_token.lock().await.clone();
        let token_response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(&self.refresh_client)
            .await
            .map_err(|e| Error::OAuth(e.to_string()))?;

        let access_token = token_response.access_token().secret().to_owned();
        let expires_in = token_response
            .expires_in()
            .unwrap_or(Duration::from_secs(3600));
        *cached = Some((access_token.clone(), Instant::now() + expires_in));

        if let Some(new_refresh) = token_response.refresh_token() {
            *self.refresh_token.lock().await = new_refresh.secret().to_owned();
        }

        log::debug!("minted a fresh access token (expires in {expires_in:?})");
        Ok(access_token)
    }
}

/// The composed result of G: a token source plus the retry transport that
/// injects its access token into every outbound request.
pub struct AuthorizedClient {
    token_source: Arc<TokenSource>,
    transport: RetryTransport,
}

impl AuthorizedClient {
    /// Mint/refresh an access token, attach it as a bearer credential to
    /// `builder`, and send the request through the retry transport.
    pub async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        cancel: Cancellation,
    ) -> Result<reqwest::Response> {
        let token = self.token_source.access_token().await?;
        let request = builder.bearer_auth(token).build()?;
        self.transport.execute(request, cancel).await
    }
}

/// Build a client authorized for every scope `service` requires.
pub async fn client_for_account(
    paths: &Paths,
    store: &dyn SecretStore,
    service: Service,
    email: &str,
) -> Result<AuthorizedClient> {
    let scopes = service.scopes().iter().map(|s| s.to_string()).collect();
    client_for_account_scopes(paths, store, service.name(), email, scopes).await
}

/// Build a client authorized for an explicit scope set, bypassing the
/// service registry (e.g. for a service composed of more than one
/// registry entry's scopes).
pub async fn client_for_account_scopes(
    paths: &Paths,
    store: &dyn SecretStore,
    service_label: &str,
    email: &str,
    _scopes: Vec<String>,
) -> Result<AuthorizedClient> {
    let creds = ClientCredentials::load(&paths.credentials_file())?;

    let token = match store.get_token(email) {
        Ok(token) => token,
        Err(Error::KeyNotFound(key)) => {
            return Err(Error::AuthRequired {
                service: service_label.to_string(),
                email: normalize_email(email),
                cause: Box::new(Error::KeyNotFound(key)),
            });
        }
        Err(err) => return Err(err),
    };

    // The refresh grant never redirects; any syntactically valid URL
    // satisfies the builder's typestate requirement.
    let oauth_client = build_oauth_client(&creds.client_id, &creds.client_secret, "http://localhost")?;
    let token_source = Arc::new(TokenSource::new(oauth_client, token.refresh_token)?);

    let tls_client = reqwest::Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .timeout(OUTER_CLIENT_TIMEOUT)
        .build()?;
    let breaker = Arc::new(CircuitBreaker::new());
    let transport = RetryTransport::new(tls_client, breaker, RETRY_BASE_DELAY);

    Ok(AuthorizedClient {
        token_source,
        transport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn oauth_client_against(server: &MockServer) -> OAuthClient {
        BasicClient::new(ClientId::new("id".into()))
            .set_client_secret(ClientSecret::new("secret".into()))
            .set_auth_uri(AuthUrl::new(server.url("/auth")).unwrap())
            .set_token_uri(TokenUrl::new(server.url("/token")).unwrap())
            .set_redirect_uri(RedirectUrl::new("http://localhost".into()).unwrap())
            .set_auth_type(AuthType::RequestBody)
    }

    #[tokio::test]
    async fn access_token_is_minted_and_cached() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "access_token": "at-1",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                }));
        });

        let source = TokenSource::new(oauth_client_against(&server), "rt".into()).unwrap();
        let token1 = source.access_token().await.unwrap();
        let token2 = source.access_token().await.unwrap();

        assert_eq!(token1, "at-1");
        assert_eq!(token2, "at-1");
        assert_eq!(mock.hits(), 1, "second call should hit the cache, not the network");
    }

    #[tokio::test]
    async fn missing_token_maps_to_auth_required() {
        struct EmptyStore;
        impl SecretStore for EmptyStore {
            fn keys(&self) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
            fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
                Err(Error::KeyNotFound(key.to_string()))
            }
            fn set_raw(&self, _key: &str, _value: &[u8]) -> Result<()> {
                Ok(())
            }
            fn delete_raw(&self, key: &str) -> Result<()> {
                Err(Error::KeyNotFound(key.to_string()))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path().join("cfg")).unwrap();
        ClientCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        }
        .save(&paths.credentials_file())
        .unwrap();

        let err = client_for_account(&paths, &EmptyStore, Service::Gmail, "a@b.com")
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::AuthRequired { service, email, .. } if service == "gmail" && email == "a@b.com")
        );
    }
}
