//! Server configuration
//!
//! One immutable `ServerPolicy` value is built from the CLI, validated once,
//! and passed by reference into everything that needs it. There are no
//! process-wide mutable settings.

use crate::{Result, SshPipeError};

/// How incoming peers are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Accept any peer without credential verification.
    Open,
    /// Accept only peers presenting exactly this secret as their password.
    SharedSecret(String),
}

/// Immutable server configuration, fixed before the listener is bound.
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    /// TCP port to listen on.
    pub port: u16,
    /// Authentication mode.
    pub auth: AuthPolicy,
    /// Keep accepting sequential connections instead of exiting after the
    /// first session completes.
    pub repeat: bool,
    /// Version banner sent in the protocol identification string.
    pub server_id: String,
}

impl ServerPolicy {
    pub fn new(port: u16, auth: AuthPolicy, repeat: bool) -> Self {
        Self {
            port,
            auth,
            repeat,
            server_id: format!("SSH-2.0-sshpipe_{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Build a policy from raw CLI values. Exactly one of `wideopen` or a
    /// non-empty `password` must be given.
    pub fn from_flags(port: u16, password: &str, wideopen: bool, repeat: bool) -> Result<Self> {
        let auth = match (wideopen, password.is_empty()) {
            (true, true) => AuthPolicy::Open,
            (false, false) => AuthPolicy::SharedSecret(password.to_string()),
            (true, false) => {
                return Err(SshPipeError::Config(
                    "--wideopen and --password are mutually exclusive".into(),
                ))
            }
            (false, true) => {
                return Err(SshPipeError::Config(
                    "either --wideopen or a non-empty --password is required".into(),
                ))
            }
        };
        Ok(Self::new(port, auth, repeat))
    }
}
