//! Salted password digests.
//!
//! `hash(secret, salt) = MD5(MD5(secret) || salt)`, matching records
//! provisioned by existing tooling.

use md5::{Digest, Md5};
use rand::RngCore;

/// Length of generated salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Compute the salted digest of `secret`.
#[must_use]
pub fn hash(secret: &str, salt: &[u8]) -> Vec<u8> {
    let inner = Md5::digest(secret.as_bytes());
    let mut outer = Md5::new();
    outer.update(inner);
    outer.update(salt);
    outer.finalize().to_vec()
}

/// Returns true if `secret` hashes to `stored` under `salt`. An empty stored
/// digest never matches.
#[must_use]
pub fn digest_matches(stored: &[u8], salt: &[u8], secret: &str) -> bool {
    !stored.is_empty() && hash(secret, salt) == stored
}

/// Generate a random salt.
#[must_use]
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// A digest together with the salt it was computed with.
#[derive(Clone, PartialEq, Eq)]
pub struct SaltedDigest {
    pub digest: Vec<u8>,
    pub salt: Vec<u8>,
}

impl SaltedDigest {
    /// Digest `secret` under a fresh random salt.
    #[must_use]
    pub fn generate(secret: &str) -> Self {
        let salt = generate_salt();
        Self { digest: hash(secret, &salt), salt }
    }

    /// Returns true if `secret` hashes to this digest.
    #[must_use]
    pub fn matches(&self, secret: &str) -> bool {
        digest_matches(&self.digest, &self.salt, secret)
    }
}

impl std::fmt::Debug for SaltedDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SaltedDigest(..)")
    }
}
