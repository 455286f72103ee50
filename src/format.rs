//! Turns a structured [`Error`] into remediation text for the CLI's top
//! level. This is the only place that knows what a user should *do* about
//! a given error kind; the error types themselves stay free of advice so
//! `kind()` checks stay stable.

use crate::error::{Error, ErrorKind};

/// Render `err` as a single line suitable for `eprintln!`, including any
/// remediation hint the kind warrants.
pub fn remediate(err: &Error) -> String {
    match err {
        Error::AuthRequired { service, email, .. } => {
            format!("{err}\n  -> run `gog auth add {email} --service {service}`")
        }
        Error::CredentialsMissing { path, .. } => {
            format!("{err}\n  -> place OAuth client credentials at `{path}`, or run `gog auth credentials`")
        }
        Error::CircuitOpen => {
            format!("{err}\n  -> the upstream has been failing repeatedly; wait and retry")
        }
        Error::RateLimited { retries, .. } => {
            format!("{err}\n  -> retried {retries} times; wait before trying again")
        }
        Error::StateMismatch => {
            format!("{err}\n  -> the authorization link may be stale; start over with `gog auth add`")
        }
        Error::NoRefreshToken => {
            format!("{err}\n  -> run `gog auth add <email> --force-consent`")
        }
        Error::Keyring(cause) if is_locked_keychain(cause) => {
            format!(
                "{err}\n  -> unlock your keychain, e.g. `security unlock-keychain`, then retry"
            )
        }
        other => other.to_string(),
    }
}

fn is_locked_keychain(cause: &keyring::Error) -> bool {
    matches!(cause, keyring::Error::NoStorageAccess(_))
}

/// True when `kind` is one the CLI should never retry automatically.
pub fn is_terminal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::AuthRequired
            | ErrorKind::CredentialsMissing
            | ErrorKind::PermissionDenied
            | ErrorKind::Cancelled
    )
}
