//! Encrypted-file secret store backend: a single JSON file of
//! `key -> base64(nonce || ciphertext)` entries, encrypted at rest with
//! AES-256-GCM under a key derived from the store's password via Argon2.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::Engine;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::{PasswordPrompt, SecretStore};
use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct EncryptedEntry {
    salt: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    entries: BTreeMap<String, EncryptedEntry>,
}

pub struct FileStore {
    path: PathBuf,
    password: PasswordPrompt,
    contents: Mutex<FileContents>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>, password: PasswordPrompt) -> Result<Self> {
        let path = path.into();
        let contents = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            FileContents::default()
        };
        Ok(FileStore {
            path,
            password,
            contents: Mutex::new(contents),
        })
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; 32]> {
        let password = (self.password)()?;
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(key)
    }

    fn persist(&self, contents: &FileContents) -> Result<()> {
        let body = serde_json::to_string_pretty(contents)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        set_mode_0600(tmp.path())?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn encrypt(&self, value: &[u8]) -> Result<EncryptedEntry> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key_bytes = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, value)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(EncryptedEntry {
            salt: b64.encode(salt),
            nonce: b64.encode(nonce_bytes),
            ciphertext: b64.encode(ciphertext),
        })
    }

    fn decrypt(&self, entry: &EncryptedEntry) -> Result<Vec<u8>> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let salt = b64
            .decode(&entry.salt)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let nonce_bytes = b64
            .decode(&entry.nonce)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let ciphertext = b64
            .decode(&entry.ciphertext)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let key_bytes = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| Error::Crypto(e.to_string()))
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

impl SecretStore for FileStore {
    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.contents.lock().unwrap().entries.keys().cloned().collect())
    }

    fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        let entry = {
            let contents = self.contents.lock().unwrap();
            contents
                .entries
                .get(key)
                .map(|e| EncryptedEntry {
                    salt: e.salt.clone(),
                    nonce: e.nonce.clone(),
                    ciphertext: e.ciphertext.clone(),
                })
                .ok_or_else(|| Error::KeyNotFound(key.to_string()))?
        };
        self.decrypt(&entry)
    }

    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let entry = self.encrypt(value)?;
        let mut contents = self.contents.lock().unwrap();
        contents.entries.insert(key.to_string(), entry);
        self.persist(&contents)
    }

    fn delete_raw(&self, key: &str) -> Result<()> {
        let mut contents = self.contents.lock().unwrap();
        if contents.entries.remove(key).is_none() {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        self.persist(&contents)
    }
}
