//! `gog auth` - the account lifecycle subcommand tree: authorize an
//! account against a service, list what's on file, elect a default, drop
//! an account, or run the local manage server.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use gog_core::authorize::{AuthorizeRequest, authorize};
use gog_core::cancel::Cancellation;
use gog_core::credentials::ClientCredentials;
use gog_core::manage_server::run_manage_server;
use gog_core::oauth_client::build_oauth_client;
use gog_core::path::Paths;
use gog_core::secret_store::{SecretStore, TokenValue};
use gog_core::service::parse_service;
use gog_core::{Error, Result};

use crate::credentials_cli::CredentialsCli;

#[derive(Args, Debug)]
pub struct AuthCli {
    #[command(subcommand)]
    command: AuthCmds,
}

#[derive(Subcommand, Debug)]
enum AuthCmds {
    /// Authorize an account for a service and store its refresh token.
    Add(AddArgs),
    /// List accounts with a token on file.
    List,
    /// Forget an account's stored token.
    Remove(AccountArg),
    /// Elect an account as the default used when `--account` is omitted.
    Default(AccountArg),
    /// Serve a local page for adding and managing accounts in a browser.
    Manage(ManageArgs),
    /// Store the OAuth client id/secret used by every authorize flow.
    Credentials(CredentialsCli),
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Account to authorize, e.g. `user@example.com`.
    email: String,

    /// Service to request scopes for (gmail, calendar, drive, ...).
    #[arg(long)]
    service: String,

    /// Paste the redirected URL instead of running a loopback listener.
    #[arg(long)]
    manual: bool,

    /// Force Google's consent screen even if previously granted, needed
    /// to obtain a refresh token again after one was revoked.
    #[arg(long)]
    force_consent: bool,

    /// Seconds to wait for the browser round trip before giving up.
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct AccountArg {
    email: String,
}

#[derive(Args, Debug)]
struct ManageArgs {
    /// Seconds to serve before shutting down automatically.
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

impl AuthCli {
    pub async fn run(self, paths: &Paths, store: Arc<dyn SecretStore>) -> Result<()> {
        match self.command {
            AuthCmds::Add(args) => add(paths, store.as_ref(), args).await,
            AuthCmds::List => list(store.as_ref()),
            AuthCmds::Remove(arg) => remove(store.as_ref(), &arg.email),
            AuthCmds::Default(arg) => set_default(store.as_ref(), &arg.email),
            AuthCmds::Manage(args) => manage(paths, store, args.timeout).await,
            AuthCmds::Credentials(args) => args.run(paths),
        }
    }
}

async fn add(paths: &Paths, store: &dyn SecretStore, args: AddArgs) -> Result<()> {
    let service = parse_service(&args.service)?;
    let creds = ClientCredentials::load(&paths.credentials_file())?;
    let oauth_client =
        build_oauth_client(&creds.client_id, &creds.client_secret, "http://127.0.0.1:0")?;
    let scopes: Vec<String> = service.scopes().iter().map(|s| s.to_string()).collect();

    let request = AuthorizeRequest {
        client: &oauth_client,
        scopes: &scopes,
        force_consent: args.force_consent,
        manual: args.manual,
        timeout: Duration::from_secs(args.timeout),
    };
    let refresh_token = authorize(request, Cancellation::never()).await?;

    let value = TokenValue {
        refresh_token,
        services: vec![service.name().to_string()],
        scopes,
        created_at: chrono::Utc::now(),
    };
    store.set_token(&args.email, value)?;
    println!("authorized {} for {}", args.email, service.name());
    Ok(())
}

fn list(store: &dyn SecretStore) -> Result<()> {
    let tokens = store.list_tokens()?;
    let default_account = store.get_default_account()?;
    if tokens.is_empty() {
        println!("no accounts authorized yet; run `gog auth add <email> --service <service>`");
        return Ok(());
    }
    for token in tokens {
        let marker = if token.email == default_account { " (default)" } else { "" };
        println!("{}{marker}  services: {}", token.email, token.services.join(", "));
    }
    Ok(())
}

fn remove(store: &dyn SecretStore, email: &str) -> Result<()> {
    store.delete_token(email)?;
    println!("removed {email}");
    Ok(())
}

fn set_default(store: &dyn SecretStore, email: &str) -> Result<()> {
    if let Err(err) = store.get_token(email) {
        return Err(Error::AuthRequired {
            service: "any".into(),
            email: email.to_string(),
            cause: Box::new(err),
        });
    }
    store.set_default_account(email)?;
    println!("default account set to {email}");
    Ok(())
}

async fn manage(paths: &Paths, store: Arc<dyn SecretStore>, timeout_secs: u64) -> Result<()> {
    run_manage_server(
        paths,
        store,
        Duration::from_secs(timeout_secs),
        Cancellation::never(),
    )
    .await
}
