//! Credential verification and scope authorization.
//!
//! Mismatches are ordinary `false` results; nothing here fails.

use super::digest;
use crate::store::{Client, GrantType, User};

/// Separators accepted between requested scopes.
const REQUESTED_SCOPE_SEPARATORS: [char; 2] = [',', ' '];

/// Returns true if `password` matches the client's stored digest.
#[must_use]
pub fn verify_client_password(client: &Client, password: &str) -> bool {
    verify_digest(&client.password_digest, &client.salt, password)
}

/// Returns true if `password` matches the user's stored digest.
#[must_use]
pub fn verify_user_password(user: &User, password: &str) -> bool {
    verify_digest(&user.password_digest, &user.salt, password)
}

fn verify_digest(stored: &[u8], salt: &[u8], password: &str) -> bool {
    digest::digest_matches(stored, salt, password)
}

/// Split a requested scope string into scope tokens.
///
/// The empty string yields one empty token, which must itself be authorized.
pub fn requested_scopes(requested: &str) -> impl Iterator<Item = &str> {
    requested.split(REQUESTED_SCOPE_SEPARATORS)
}

/// Returns true if every requested scope is authorized for `grant`.
///
/// A disabled grant authorizes nothing.
#[must_use]
pub fn verify_grant_scopes(client: &Client, grant: GrantType, requested: &str) -> bool {
    let Some(authorized) = client.grants.for_grant(grant) else {
        return false;
    };
    requested_scopes(requested).all(|scope| authorized.contains(scope))
}
