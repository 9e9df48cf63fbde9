//! Token minting with collision retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::config::oauth::{ACCESS_TOKEN_LIFETIME, TOKEN_LENGTH};
use crate::error::StoreResult;
use crate::store::{GrantType, IdentityStore, Token};

/// Source of candidate token strings.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random `[A-Za-z0-9]` tokens of a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct AlphanumericGenerator {
    length: usize,
}

impl AlphanumericGenerator {
    #[must_use]
    pub const fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for AlphanumericGenerator {
    fn default() -> Self {
        Self::new(TOKEN_LENGTH)
    }
}

impl TokenGenerator for AlphanumericGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

/// Issues access tokens and persists them through the identity store.
///
/// Uniqueness of `(client, token)` comes from the store's create-if-absent
/// write: on a collision the minter draws a fresh token and tries again.
#[derive(Clone)]
pub struct TokenMinter {
    store: IdentityStore,
    generator: Arc<dyn TokenGenerator>,
    lifetime: Duration,
}

impl TokenMinter {
    /// Create a minter issuing random 8-character tokens valid for one hour.
    #[must_use]
    pub fn new(store: IdentityStore) -> Self {
        Self::with_generator(store, Arc::new(AlphanumericGenerator::default()))
    }

    /// Create a minter drawing tokens from `generator`.
    #[must_use]
    pub fn with_generator(store: IdentityStore, generator: Arc<dyn TokenGenerator>) -> Self {
        Self { store, generator, lifetime: ACCESS_TOKEN_LIFETIME }
    }

    /// Set the issued token lifetime.
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Lifetime of issued tokens.
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Mint and persist a token for `client` (and `user`, empty for
    /// client-only grants) carrying `scopes`.
    ///
    /// Retries until a write succeeds; any non-duplicate store error is
    /// returned unchanged.
    pub async fn issue_token(
        &self,
        client: &str,
        user: &str,
        grant: GrantType,
        scopes: &str,
    ) -> StoreResult<Token> {
        let mut collisions = 0u32;
        loop {
            let token = Token {
                client: client.to_owned(),
                token: self.generator.generate(),
                user: user.to_owned(),
                scopes: scopes.to_owned(),
                expires_at: self.expiry_from(Utc::now()),
            };

            match self.store.put_token(token.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        client = %client,
                        grant_type = %grant,
                        collisions,
                        "Issued access token"
                    );
                    return Ok(token);
                }
                Err(e) if e.is_duplicate() => {
                    collisions += 1;
                    tracing::debug!(client = %client, collisions, "Token collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.lifetime)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter").field("lifetime", &self.lifetime).finish()
    }
}
