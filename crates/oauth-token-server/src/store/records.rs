//! Client, user and token records.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// OAuth2 grant types a client can be provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    ResourceOwnerPassword,
    ClientCredentials,
}

impl GrantType {
    /// All grant types, in storage order.
    pub const ALL: [Self; 4] = [
        Self::AuthorizationCode,
        Self::Implicit,
        Self::ResourceOwnerPassword,
        Self::ClientCredentials,
    ];

    /// Value of the `grant_type` request parameter.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::ResourceOwnerPassword => "password",
            Self::ClientCredentials => "client_credentials",
        }
    }

    /// Parse a `grant_type` request parameter.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|grant| grant.wire_name() == value)
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A set of scope names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `scope` is a member.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Add a scope.
    pub fn insert(&mut self, scope: impl Into<String>) {
        self.0.insert(scope.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate members in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Authorized scope sets per grant type. `None` means the grant is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantScopes {
    pub authorization_code: Option<ScopeSet>,
    pub implicit: Option<ScopeSet>,
    pub resource_owner: Option<ScopeSet>,
    pub client_credentials: Option<ScopeSet>,
}

impl GrantScopes {
    /// Scope set for `grant`, if the grant is enabled.
    #[must_use]
    pub const fn for_grant(&self, grant: GrantType) -> Option<&ScopeSet> {
        match grant {
            GrantType::AuthorizationCode => self.authorization_code.as_ref(),
            GrantType::Implicit => self.implicit.as_ref(),
            GrantType::ResourceOwnerPassword => self.resource_owner.as_ref(),
            GrantType::ClientCredentials => self.client_credentials.as_ref(),
        }
    }

    /// Mutable slot for `grant`.
    pub fn slot_mut(&mut self, grant: GrantType) -> &mut Option<ScopeSet> {
        match grant {
            GrantType::AuthorizationCode => &mut self.authorization_code,
            GrantType::Implicit => &mut self.implicit,
            GrantType::ResourceOwnerPassword => &mut self.resource_owner,
            GrantType::ClientCredentials => &mut self.client_credentials,
        }
    }
}

/// Who changed a record, when, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audit {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: String,
    pub created_from: String,
    pub updated_from: String,
}

/// A registered OAuth client.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Client {
    /// Globally unique, immutable client username.
    pub username: String,
    pub password_digest: Vec<u8>,
    pub salt: Vec<u8>,
    /// Username of the owning user.
    pub owner: String,
    pub grants: GrantScopes,
    pub redirect_uri_authorization_code: String,
    pub redirect_uri_implicit: String,
    pub name: String,
    pub description: String,
    pub audit: Audit,
}

impl Client {
    /// Create a client with no credentials and every grant disabled.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), ..Self::default() }
    }

    /// Set the salted password digest.
    #[must_use]
    pub fn with_credentials(mut self, password_digest: Vec<u8>, salt: Vec<u8>) -> Self {
        self.password_digest = password_digest;
        self.salt = salt;
        self
    }

    /// Enable `grant` with the given scopes.
    #[must_use]
    pub fn with_grant<S: Into<String>>(
        mut self,
        grant: GrantType,
        scopes: impl IntoIterator<Item = S>,
    ) -> Self {
        *self.grants.slot_mut(grant) = Some(scopes.into_iter().collect());
        self
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("owner", &self.owner)
            .field("grants", &self.grants)
            .field("name", &self.name)
            .finish()
    }
}

/// A resource owner.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Opaque user id.
    pub uid: String,
    /// Unique username.
    pub username: String,
    pub password_digest: Vec<u8>,
    pub salt: Vec<u8>,
}

impl User {
    #[must_use]
    pub fn new(uid: impl Into<String>, username: impl Into<String>) -> Self {
        Self { uid: uid.into(), username: username.into(), ..Self::default() }
    }

    /// Set the salted password digest.
    #[must_use]
    pub fn with_credentials(mut self, password_digest: Vec<u8>, salt: Vec<u8>) -> Self {
        self.password_digest = password_digest;
        self.salt = salt;
        self
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User").field("uid", &self.uid).field("username", &self.username).finish()
    }
}

/// An issued bearer access token. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Issuing client username.
    pub client: String,
    /// Token string, unique within the issuing client.
    pub token: String,
    /// Resource owner username; empty for client-only grants.
    pub user: String,
    /// Granted scopes as requested.
    pub scopes: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime at `now`, zero once expired.
    #[must_use]
    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}
