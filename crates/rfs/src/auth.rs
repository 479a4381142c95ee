//! Credential Verification
//!
//! NIST 800-53: IA-2 (Identification and Authentication), IA-5 (Authenticator Management)
//! STIG: V-222542 - The application must only store cryptographic representations of passwords
//!
//! Whether a user exists is decided by the data root (a home directory named
//! after the user). The [`Authenticator`] only decides whether the supplied
//! password is acceptable for that user.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;

/// Password policy applied after the user's home directory is found
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return true if `password` is acceptable for `username`
    async fn verify(&self, username: &str, password: &str) -> bool;
}

/// Accepts any password
///
/// Used when the configuration carries no credential table.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl Authenticator for AcceptAll {
    async fn verify(&self, _username: &str, _password: &str) -> bool {
        true
    }
}

/// Checks passwords against a table of SHA-256 digests
///
/// NIST 800-53: IA-5(1) (Password-Based Authentication)
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    digests: HashMap<String, String>,
}

impl StaticCredentials {
    /// Build from a username to hex digest table
    pub fn new(digests: HashMap<String, String>) -> Self {
        let digests = digests
            .into_iter()
            .map(|(user, digest)| (user, digest.to_ascii_lowercase()))
            .collect();
        Self { digests }
    }
}

#[async_trait]
impl Authenticator for StaticCredentials {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let Some(expected) = self.digests.get(username) else {
            debug!(username, "No credential entry for user");
            return false;
        };
        constant_time_eq(expected.as_bytes(), hash_password(password).as_bytes())
    }
}

/// Lowercase hex SHA-256 of a password, the form stored in `[users]`
///
/// NIST 800-53: SC-13 (Cryptographic Protection)
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Select the password policy for a configuration
pub fn from_config(config: &Config) -> Arc<dyn Authenticator> {
    if config.users.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(StaticCredentials::new(config.users.clone()))
    }
}
