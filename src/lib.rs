//! sshpipe - Ad-hoc pipe plumbing over SSH
//!
//! Exposes a single ephemeral, authenticated SSH endpoint that plumbs the
//! local process's stdin/stdout to one remote peer. There is nothing to
//! distribute ahead of time beyond the shared secret, and nothing persists:
//! the host key is generated fresh for every run.

pub mod auth;
pub mod config;
pub mod keys;
pub mod server;
pub mod session;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshPipeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind listening port: {0}")]
    Bind(std::io::Error),

    #[error("Failed to accept connection: {0}")]
    Accept(std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unsupported channel type: {0}")]
    ChannelType(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("Key error: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshPipeError>;

/// Re-exports for convenience
pub use auth::Authenticator;
pub use config::{AuthPolicy, ServerPolicy};
pub use keys::HostIdentity;
pub use server::run;
