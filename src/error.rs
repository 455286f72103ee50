use thiserror::Error;

/// Stable, matchable classification of an [`Error`], independent of the
/// message text so callers can branch on `kind()` without destructuring
/// the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthRequired,
    CredentialsMissing,
    RateLimited,
    CircuitOpen,
    QuotaExceeded,
    NotFound,
    PermissionDenied,
    Cancelled,
    Config,
    Other,
}

/// Crate-wide error type.
///
/// Remediation text is never carried here - see [`crate::format`] for that.
/// Errors only hold the structured data needed to decide what remediation
/// applies.
#[derive(Debug, Error)]
pub enum Error {
    /// No token on file for `email` under `service`.
    #[error("no token found for `{email}` ({service})")]
    AuthRequired {
        service: String,
        email: String,
        #[source]
        cause: Box<Error>,
    },

    /// The OAuth client-credentials file is missing or unreadable.
    #[error("client credentials not found at `{path}`")]
    CredentialsMissing {
        path: String,
        #[source]
        cause: Box<std::io::Error>,
    },

    /// Client credentials JSON is missing `client_id` or `client_secret`.
    #[error("client credentials file `{path}` is missing `{field}`")]
    CredentialsInvalid { path: String, field: String },

    /// Retries against a 429 response were exhausted.
    #[error("rate limited (retried {retries} times)")]
    RateLimited {
        retry_after: Option<u64>,
        retries: u32,
    },

    /// The circuit breaker is open; the call was short-circuited.
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("quota exceeded for `{resource}`")]
    QuotaExceeded { resource: String },

    #[error("`{resource}` not found: `{id}`")]
    NotFound { resource: String, id: String },

    #[error("permission denied performing `{action}` on `{resource}`")]
    PermissionDenied { resource: String, action: String },

    /// `Authorize` was called with an empty scope set.
    #[error("no scopes requested")]
    MissingScopes,

    /// The `state` query parameter on a callback did not match the value
    /// generated at the start of the flow.
    #[error("OAuth state parameter did not match")]
    StateMismatch,

    /// The OAuth callback carried no `code` parameter.
    #[error("OAuth callback carried no authorization code")]
    MissingCode,

    /// The provider granted an access token but no refresh token.
    #[error("no refresh token granted; retry with force_consent")]
    NoRefreshToken,

    /// The user's browser reported `error=<reason>` on the callback.
    #[error("authorization error: {0}")]
    AuthorizationDenied(String),

    /// A secret-store key was requested that does not exist.
    #[error("key not found: `{0}`")]
    KeyNotFound(String),

    /// `email` was empty, or a record required a non-empty field that was
    /// empty.
    #[error("{0}")]
    InvalidRecord(String),

    /// Configuration value was invalid (e.g. unrecognised keyring backend).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation was cancelled or timed out.
    #[error("{0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] Box<toml::ser::Error>),

    #[error(transparent)]
    TomlDe(#[from] Box<toml::de::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("encryption error: {0}")]
    Crypto(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthRequired { .. } => ErrorKind::AuthRequired,
            Error::CredentialsMissing { .. } | Error::CredentialsInvalid { .. } => {
                ErrorKind::CredentialsMissing
            }
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::CircuitOpen => ErrorKind::CircuitOpen,
            Error::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_auth_required(&self) -> bool {
        self.kind() == ErrorKind::AuthRequired
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == ErrorKind::CircuitOpen
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
