#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
//! Credential lifecycle and resilient outbound HTTP for a CLI that
//! brokers access to Google's SaaS APIs on behalf of one or more
//! accounts: OAuth authorization (loopback and manual flows), a secret
//! store over the OS keychain or an encrypted file, and an HTTP
//! transport that retries 429/5xx responses behind a circuit breaker.

pub mod authorize;
pub mod breaker;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod format;
pub mod manage_server;
pub mod oauth_client;
pub mod output;
pub mod path;
pub mod secret_store;
pub mod service;
pub mod transport;

pub use error::{Error, Result};
