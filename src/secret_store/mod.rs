//! Capability-based abstraction over an OS keychain or an encrypted file,
//! storing refresh tokens and the default-account pointer.

mod file_backend;
mod keyring_backend;

pub use file_backend::FileStore;
pub use keyring_backend::KeyringStore;

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const TOKEN_KEY_PREFIX: &str = "token:";
pub const DEFAULT_ACCOUNT_KEY: &str = "default_account";

/// `(refresh_token, services[], scopes[], created_at)` as stored at
/// `token:<email>`. `email` is never part of the serialized value; it is
/// recovered from the key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenValue {
    pub refresh_token: String,
    pub services: Vec<String>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A `TokenValue` paired with the email it belongs to, as returned to
/// callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub email: String,
    pub refresh_token: String,
    pub services: Vec<String>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    fn from_value(email: String, value: TokenValue) -> Self {
        TokenRecord {
            email,
            refresh_token: value.refresh_token,
            services: value.services,
            scopes: value.scopes,
            created_at: value.created_at,
        }
    }
}

/// Lower-case, trim the email so `"A@B.COM"` and `" a@b.com "` address the
/// same record.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Abstract key -> bytes secret store, with typed operations layered on
/// top for token records and the default-account pointer.
pub trait SecretStore: Send + Sync {
    /// Opaque keys currently present.
    fn keys(&self) -> Result<Vec<String>>;

    fn get_raw(&self, key: &str) -> Result<Vec<u8>>;
    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete_raw(&self, key: &str) -> Result<()>;

    fn set_token(&self, email: &str, mut value: TokenValue) -> Result<()> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(Error::InvalidRecord("email must not be empty".into()));
        }
        if value.refresh_token.is_empty() {
            return Err(Error::InvalidRecord(
                "refresh_token must not be empty".into(),
            ));
        }
        if value.created_at == DateTime::<Utc>::default() {
            value.created_at = Utc::now();
        }

        let bytes = serde_json::to_vec(&value)?;
        self.set_raw(&format!("{TOKEN_KEY_PREFIX}{email}"), &bytes)
    }

    fn get_token(&self, email: &str) -> Result<TokenRecord> {
        let email = normalize_email(email);
        let bytes = self.get_raw(&format!("{TOKEN_KEY_PREFIX}{email}"))?;
        let value: TokenValue = serde_json::from_slice(&bytes)?;
        Ok(TokenRecord::from_value(email, value))
    }

    fn delete_token(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        self.delete_raw(&format!("{TOKEN_KEY_PREFIX}{email}"))
    }

    /// Every `token:<email>` key with a non-blank email suffix. An
    /// individual read failure aborts the whole listing.
    fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let mut records = Vec::new();
        for key in self.keys()? {
            let Some(email) = parse_token_key(&key) else {
                continue;
            };
            records.push(self.get_token(&email)?);
        }
        Ok(records)
    }

    /// Empty string, not an error, when unset.
    fn get_default_account(&self) -> Result<String> {
        match self.get_raw(DEFAULT_ACCOUNT_KEY) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).to_string()),
            Err(Error::KeyNotFound(_)) => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    fn set_default_account(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        self.set_raw(DEFAULT_ACCOUNT_KEY, email.as_bytes())
    }
}

/// Extract `email` from a `token:<email>` key. Rejects a bare
/// `"token:"` or a blank remainder (e.g. `"token:   "`).
pub fn parse_token_key(key: &str) -> Option<String> {
    let rest = key.strip_prefix(TOKEN_KEY_PREFIX)?;
    let rest = rest.trim();
    if rest.is_empty() { None } else { Some(rest.to_string()) }
}

/// Resolution order for which backend to use: env override, then
/// configuration, then `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringBackend {
    Auto,
    Keychain,
    File,
}

impl KeyringBackend {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Ok(KeyringBackend::Auto),
            "keychain" => Ok(KeyringBackend::Keychain),
            "file" => Ok(KeyringBackend::File),
            other => Err(Error::Config(format!(
                "invalid GOG_KEYRING_BACKEND value `{other}`; expected auto, keychain, or file"
            ))),
        }
    }

    pub fn resolve(env_value: Option<&str>, config_value: Option<&str>) -> Result<Self> {
        if let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) {
            return Self::parse(raw);
        }
        if let Some(raw) = config_value.filter(|v| !v.trim().is_empty()) {
            return Self::parse(raw);
        }
        Ok(KeyringBackend::Auto)
    }
}

/// A password source for the file backend. Boxed so callers can inject a
/// fixed string in tests without a TTY.
pub type PasswordPrompt = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Select a password prompt per the rules in §4.1: env var, then TTY
/// prompt, then a hard error.
pub fn select_password_prompt(env_password: Option<String>) -> PasswordPrompt {
    if let Some(pw) = env_password.filter(|p| !p.is_empty()) {
        return Box::new(move || Ok(pw.clone()));
    }
    Box::new(|| {
        if std::io::stdin().is_terminal() {
            dialoguer::Password::new()
                .with_prompt("keyring password")
                .interact()
                .map_err(|e| Error::Config(format!("failed to read password: {e}")))
        } else {
            Err(Error::Config(
                "no TTY available; set GOG_KEYRING_PASSWORD".into(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryStore {
        data: std::sync::Mutex<std::collections::BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            MemoryStore {
                data: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            }
        }
    }

    impl SecretStore for MemoryStore {
        fn keys(&self) -> Result<Vec<String>> {
            Ok(self.data.lock().unwrap().keys().cloned().collect())
        }

        fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
            self.data
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| Error::KeyNotFound(key.to_string()))
        }

        fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn delete_raw(&self, key: &str) -> Result<()> {
            self.data
                .lock()
                .unwrap()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| Error::KeyNotFound(key.to_string()))
        }
    }

    fn sample_value() -> TokenValue {
        TokenValue {
            refresh_token: "rt".into(),
            services: vec!["gmail".into()],
            scopes: vec!["https://mail.google.com/".into()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn email_normalization_law() {
        let store = MemoryStore::new();
        store.set_token("A@B.COM", sample_value()).unwrap();

        let tokens = store.list_tokens().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].email, "a@b.com");
    }

    #[test]
    fn token_roundtrip() {
        let store = MemoryStore::new();
        let value = sample_value();
        store.set_token(" Foo@Bar.com ", value.clone()).unwrap();

        let record = store.get_token("foo@bar.com").unwrap();
        assert_eq!(record.email, "foo@bar.com");
        assert_eq!(record.refresh_token, value.refresh_token);
        assert_eq!(record.services, value.services);
        assert_eq!(record.scopes, value.scopes);
    }

    #[test]
    fn default_account_absent_is_empty_not_error() {
        let store = MemoryStore::new();
        assert_eq!(store.get_default_account().unwrap(), "");
    }

    #[test]
    fn token_key_parsing() {
        assert_eq!(parse_token_key("token:"), None);
        assert_eq!(parse_token_key("token:   "), None);
        assert_eq!(
            parse_token_key("token:a@b.com"),
            Some("a@b.com".to_string())
        );
    }

    #[test]
    fn backend_resolution_order() {
        assert_eq!(
            KeyringBackend::resolve(Some("file"), Some("keychain")).unwrap(),
            KeyringBackend::File
        );
        assert_eq!(
            KeyringBackend::resolve(None, Some("keychain")).unwrap(),
            KeyringBackend::Keychain
        );
        assert_eq!(
            KeyringBackend::resolve(None, None).unwrap(),
            KeyringBackend::Auto
        );
    }

    #[test]
    fn backend_resolution_rejects_unknown_value() {
        assert!(KeyringBackend::resolve(Some("bogus"), None).is_err());
    }

    #[test]
    fn set_token_rejects_empty_refresh_token() {
        let store = MemoryStore::new();
        let mut value = sample_value();
        value.refresh_token = String::new();
        assert!(store.set_token("a@b.com", value).is_err());
    }
}
