//! # gog - credential broker for Google SaaS APIs
//!
//! Authorizes one or more Google accounts against the services this
//! machine talks to, stores their refresh tokens in the OS keychain (or
//! an encrypted file when no keychain is available), and hands out
//! resilient, retrying HTTP clients built on top of them.
//!
//! ## Authentication
//!
//! - **Client credentials**: `<config_dir>/gogcli/credentials.json`, set
//!   with `gog auth credentials`.
//! - **Token storage**: OS keychain by default; `GOG_KEYRING_BACKEND=file`
//!   falls back to an encrypted file under the same config directory.
//!
//! ## Command structure
//!
//! ```bash
//! gog [OPTIONS] <COMMAND>
//! ```
//!
//! - `auth add <email> --service <service>` - run the OAuth flow and
//!   store the resulting refresh token.
//! - `auth list` - list accounts with a token on file.
//! - `auth remove <email>` - forget an account.
//! - `auth default <email>` - elect the default account.
//! - `auth manage` - serve a local page for managing accounts in a
//!   browser.
//! - `auth credentials --client-id <id> --client-secret <secret>` - set
//!   the OAuth client credentials.
//!
//! ## Exit codes
//!
//! - **0**: success
//! - **101**: error (remediation text, if any, is printed to stderr)

use clap::{Parser, Subcommand};
use gog_core::config::AppConfig;
use gog_core::path::Paths;
use gog_core::secret_store::{FileStore, KeyringBackend, KeyringStore, SecretStore, select_password_prompt};
use gog_core::Result;
use std::sync::Arc;

mod auth_cli;
mod credentials_cli;

use auth_cli::AuthCli;

/// Root CLI definition: global verbosity flags plus a single subcommand.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Logging verbosity control.
    ///
    /// Use `-q` for quiet (errors only), default for info level, `-v`
    /// for debug level, `-vv` for trace level.
    #[clap(flatten)]
    logging: clap_verbosity_flag::Verbosity,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authorize, list, and manage Google accounts.
    #[clap(name = "auth", display_order = 1)]
    Auth(AuthCli),
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let mut logging = get_logging(args.logging.log_level_filter());
    logging.init();
    log::debug!("logging started");

    std::process::exit(match run(args).await {
        Ok(()) => 0,
        Err(err) => {
            log::error!("{err}");
            eprintln!("{}", gog_core::format::remediate(&err));
            101
        }
    });
}

async fn run(args: Cli) -> Result<()> {
    let paths = Paths::resolve()?;
    let config = AppConfig::load(&paths)?;
    let store = build_store(&paths, &config)?;

    match args.command {
        Commands::Auth(auth_cli) => auth_cli.run(&paths, store).await,
    }
}

/// Resolve and construct the secret store per the backend precedence
/// rules: `GOG_KEYRING_BACKEND` env var, then configuration, then
/// `Auto` (prefer the OS keychain, fall back to the encrypted file).
fn build_store(paths: &Paths, config: &AppConfig) -> Result<Arc<dyn SecretStore>> {
    let env_backend = std::env::var("GOG_KEYRING_BACKEND").ok();
    let backend = KeyringBackend::resolve(env_backend.as_deref(), config.keyring_backend.as_deref())?;

    match backend {
        KeyringBackend::Keychain => Ok(Arc::new(KeyringStore::new())),
        KeyringBackend::File => Ok(Arc::new(file_store(paths)?)),
        KeyringBackend::Auto => {
            let probe = KeyringStore::new();
            if probe.keys().is_ok() {
                Ok(Arc::new(probe))
            } else {
                log::info!("no usable OS keychain found; falling back to the encrypted file store");
                Ok(Arc::new(file_store(paths)?))
            }
        }
    }
}

fn file_store(paths: &Paths) -> Result<FileStore> {
    let env_password = std::env::var("GOG_KEYRING_PASSWORD").ok();
    let prompt = select_password_prompt(env_password);
    FileStore::open(paths.keyring_dir()?.join("secrets.json"), prompt)
}

/// Mirrors the teacher's logging setup: a floor of info level, scoped to
/// this crate so dependency chatter at `-v` doesn't drown out our own.
fn get_logging(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter(Some("gog"), level);
    builder.filter(Some("gog_core"), level);
    builder.format_timestamp_secs().format_module_path(false);
    builder
}
