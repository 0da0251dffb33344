//! Host identity
//!
//! One ephemeral Ed25519 key pair is generated at process start and signs
//! every handshake for the lifetime of the process. Nothing is read from or
//! written to disk, so there are no keys to distribute and nothing to clean
//! up; peers verifying host keys will see a different identity on every run.

use russh_keys::key::KeyPair;

/// The server's asymmetric identity for this process run.
pub struct HostIdentity {
    key: KeyPair,
}

impl HostIdentity {
    /// Generate a fresh Ed25519 key pair.
    pub fn generate() -> Self {
        log::debug!("Generating ephemeral Ed25519 host key");
        Self {
            key: KeyPair::generate_ed25519(),
        }
    }

    /// Hand the key pair over to the transport configuration.
    pub fn into_key_pair(self) -> KeyPair {
        self.key
    }
}
