//! `gog auth credentials` - writes the OAuth client id/secret used by
//! every authorize flow and token refresh.

use clap::Args;
use gog_core::credentials::ClientCredentials;
use gog_core::path::Paths;
use gog_core::Result;

#[derive(Args, Debug)]
pub struct CredentialsCli {
    /// OAuth client ID from the Google Cloud console.
    #[arg(long)]
    client_id: String,

    /// OAuth client secret paired with `client_id`.
    #[arg(long)]
    client_secret: String,
}

impl CredentialsCli {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let creds = ClientCredentials {
            client_id: self.client_id,
            client_secret: self.client_secret,
        };
        creds.save(&paths.credentials_file())?;
        println!("wrote client credentials to {}", paths.credentials_file().display());
        Ok(())
    }
}
