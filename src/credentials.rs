//! Reads and writes the OAuth client's `client_id`/`client_secret` at
//! `<config_dir>/credentials.json`.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A loaded `(client_id, client_secret)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct InstalledOrWebShape {
    installed: Option<ClientIdSecret>,
    web: Option<ClientIdSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientIdSecret {
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Serialize)]
struct FlatShape<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

impl ClientCredentials {
    /// Read `path`, accepting either the `{"installed": {...}}` or
    /// `{"web": {...}}` shape Google's console downloads use.
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|e| Error::CredentialsMissing {
            path: path_str.clone(),
            cause: Box::new(e),
        })?;

        let shape: InstalledOrWebShape = serde_json::from_str(&raw)?;
        let inner = shape
            .installed
            .or(shape.web)
            .ok_or_else(|| Error::CredentialsInvalid {
                path: path_str.clone(),
                field: "installed/web".into(),
            })?;

        let client_id = inner.client_id.ok_or_else(|| Error::CredentialsInvalid {
            path: path_str.clone(),
            field: "client_id".into(),
        })?;
        let client_secret = inner
            .client_secret
            .ok_or_else(|| Error::CredentialsInvalid {
                path: path_str,
                field: "client_secret".into(),
            })?;

        Ok(ClientCredentials {
            client_id,
            client_secret,
        })
    }

    /// Write `self` to `path` in the flat `{client_id, client_secret}`
    /// form, atomically (temp file + rename) and with mode 0600.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&FlatShape {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        })?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        set_mode_0600(tmp.path())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        log::info!("wrote client credentials to {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode_0600(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0600(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_installed_shape() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        fs::write(
            &path,
            r#"{"installed":{"client_id":"id1","client_secret":"secret1"}}"#,
        )
        .unwrap();

        let creds = ClientCredentials::load(&path).unwrap();
        assert_eq!(creds.client_id, "id1");
        assert_eq!(creds.client_secret, "secret1");
    }

    #[test]
    fn loads_web_shape() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        fs::write(&path, r#"{"web":{"client_id":"id2","client_secret":"s2"}}"#).unwrap();

        let creds = ClientCredentials::load(&path).unwrap();
        assert_eq!(creds.client_id, "id2");
    }

    #[test]
    fn missing_file_is_credentials_missing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nope.json");
        let err = ClientCredentials::load(&path).unwrap_err();
        assert!(matches!(err, Error::CredentialsMissing { .. }));
    }

    #[test]
    fn missing_client_secret_is_hard_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        fs::write(&path, r#"{"installed":{"client_id":"id1"}}"#).unwrap();

        let err = ClientCredentials::load(&path).unwrap_err();
        assert!(matches!(err, Error::CredentialsInvalid { field, .. } if field == "client_secret"));
    }

    #[test]
    fn save_writes_flat_shape_atomically() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        let creds = ClientCredentials {
            client_id: "id1".into(),
            client_secret: "secret1".into(),
        };
        creds.save(&path).unwrap();

        let reloaded: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded["client_id"], "id1");
        assert_eq!(reloaded["client_secret"], "secret1");
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_mode_0600() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        let creds = ClientCredentials {
            client_id: "id1".into(),
            client_secret: "secret1".into(),
        };
        creds.save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
