//! OS keychain backend, via the `keyring` crate.
//!
//! The keyring crate has no "list all keys under a service" primitive, so
//! this backend keeps a small index entry (itself a keyring entry) of the
//! keys it has written, updated on every `set_raw`/`delete_raw`.

use std::sync::Mutex;

use base64::Engine;
use keyring::Entry;

use super::SecretStore;
use crate::error::{Error, Result};

const SERVICE: &str = "gogcli";
const INDEX_KEY: &str = "__gog_keyring_index__";

pub struct KeyringStore {
    index_lock: Mutex<()>,
}

impl KeyringStore {
    pub fn new() -> Self {
        KeyringStore {
            index_lock: Mutex::new(()),
        }
    }

    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE, key).map_err(Error::Keyring)
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match Self::entry(INDEX_KEY)?.get_password() {
            Ok(joined) => Ok(joined.lines().map(|s| s.to_string()).collect()),
            Err(keyring::Error::NoEntry) => Ok(Vec::new()),
            Err(err) => Err(Error::Keyring(err)),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<()> {
        Self::entry(INDEX_KEY)?
            .set_password(&keys.join("\n"))
            .map_err(Error::Keyring)
    }

    fn index_add(&self, key: &str) -> Result<()> {
        let _guard = self.index_lock.lock().unwrap();
        let mut keys = self.read_index()?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.write_index(&keys)?;
        }
        Ok(())
    }

    fn index_remove(&self, key: &str) -> Result<()> {
        let _guard = self.index_lock.lock().unwrap();
        let mut keys = self.read_index()?;
        keys.retain(|k| k != key);
        self.write_index(&keys)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn keys(&self) -> Result<Vec<String>> {
        self.read_index()
    }

    fn get_raw(&self, key: &str) -> Result<Vec<u8>> {
        match Self::entry(key)?.get_password() {
            Ok(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::Crypto(e.to_string())),
            Err(keyring::Error::NoEntry) => Err(Error::KeyNotFound(key.to_string())),
            Err(err) => Err(Error::Keyring(err)),
        }
    }

    fn set_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        Self::entry(key)?
            .set_password(&encoded)
            .map_err(Error::Keyring)?;
        self.index_add(key)
    }

    fn delete_raw(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) => self.index_remove(key),
            Err(keyring::Error::NoEntry) => Err(Error::KeyNotFound(key.to_string())),
            Err(err) => Err(Error::Keyring(err)),
        }
    }
}
