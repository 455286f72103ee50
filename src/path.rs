//! Per-user directories for config, the file-backed keyring, and
//! per-service caches, all rooted under the OS's standard config
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const APP_DIR: &str = "gogcli";

/// Resolved set of directories this crate reads and writes.
///
/// All directories are created with mode 0700 on first access; none are
/// ever removed by this crate.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve `<os_config_dir>/gogcli/`, creating it if absent.
    pub fn resolve() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| {
            Error::Config("could not determine the OS config directory".into())
        })?;
        let root = base.join(APP_DIR);
        ensure_dir(&root)?;
        Ok(Paths { root })
    }

    /// Build a `Paths` rooted at an arbitrary directory, bypassing OS
    /// config-dir resolution. Used by tests and by operators who want an
    /// isolated config root.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Paths { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn keyring_dir(&self) -> Result<PathBuf> {
        self.subdir("keyring")
    }

    pub fn drive_downloads_dir(&self) -> Result<PathBuf> {
        self.subdir("drive-downloads")
    }

    pub fn gmail_attachments_dir(&self) -> Result<PathBuf> {
        self.subdir("gmail-attachments")
    }

    pub fn gmail_watch_state_dir(&self) -> Result<PathBuf> {
        self.subdir("state/gmail-watch")
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        ensure_dir(&dir)?;
        Ok(dir)
    }
}

#[cfg(unix)]
fn ensure_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match fs::create_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(Error::Io(err)),
    }
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::Io(err)),
    }
}
