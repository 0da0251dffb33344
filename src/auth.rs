//! Authentication policy
//!
//! Decides, per incoming connection, whether credentials are acceptable:
//! either anyone is (wideopen mode), or the presented password must equal
//! the configured shared secret.
//!
//! The comparison is plain byte equality. There is no lockout, no attempt
//! counting and no timing-safe comparison; for a single ephemeral session
//! guarded by a one-time secret that is an accepted limitation.

use crate::config::AuthPolicy;

/// Per-connection credential check, configured once from the server policy.
pub struct Authenticator {
    policy: AuthPolicy,
}

impl Authenticator {
    pub fn new(policy: AuthPolicy) -> Self {
        Self { policy }
    }

    /// True when no credential verification is performed at all.
    pub fn open_access(&self) -> bool {
        matches!(self.policy, AuthPolicy::Open)
    }

    /// Check a candidate password against the configured policy.
    pub fn check(&self, candidate: &str) -> bool {
        match &self.policy {
            AuthPolicy::Open => true,
            AuthPolicy::SharedSecret(secret) => candidate.as_bytes() == secret.as_bytes(),
        }
    }
}
