//! Grant dispatch: the verification sequence behind the token endpoint.
//!
//! A request moves through [`Stage`]s in a fixed order and is rejected at the
//! first failing check:
//!
//! 1. method is POST
//! 2. no form parameter is repeated
//! 3. `grant_type` names a supported [`Grant`]
//! 4. client authenticates with HTTP Basic credentials
//! 5. resource owner authenticates (`password` grant only)
//! 6. client is provisioned for the grant type
//! 7. requested scopes are authorized for that grant type
//! 8. token is minted and persisted
//!
//! No token is written unless every check passes.

use std::collections::HashSet;
use std::fmt;

use axum::http::Method;

use super::minter::TokenMinter;
use super::verify;
use crate::error::{OAuthError, OAuthResult};
use crate::store::{Client, GrantType, IdentityStore, Token};

/// Description sent when a form parameter repeats.
pub const REPEATED_PARAMETER: &str = "request parameters must not be included more than once";

/// Progress of a token request through the verification sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivedRequest,
    ValidatedMethod,
    ValidatedForm,
    ClientAuthenticated,
    ResourceOwnerAuthenticated,
    GrantAuthorized,
    ScopeAuthorized,
    TokenIssued,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReceivedRequest => "received_request",
            Self::ValidatedMethod => "validated_method",
            Self::ValidatedForm => "validated_form",
            Self::ClientAuthenticated => "client_authenticated",
            Self::ResourceOwnerAuthenticated => "resource_owner_authenticated",
            Self::GrantAuthorized => "grant_authorized",
            Self::ScopeAuthorized => "scope_authorized",
            Self::TokenIssued => "token_issued",
        };
        f.write_str(name)
    }
}

/// HTTP Basic credentials presented by the client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub username: String,
    pub password: String,
}

impl ClientCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials").field("username", &self.username).finish()
    }
}

/// A token request as received from the transport.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub method: Method,
    pub credentials: Option<ClientCredentials>,
    /// Query and body parameters in arrival order.
    pub params: Vec<(String, String)>,
}

/// Form parameters after the repeated-key check. Missing keys are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenForm {
    pub grant_type: String,
    pub scope: String,
    pub username: String,
    pub password: String,
}

impl TokenForm {
    /// Build the form, rejecting any key that appears more than once.
    pub fn from_params(params: &[(String, String)]) -> OAuthResult<Self> {
        let mut seen = HashSet::with_capacity(params.len());
        if !params.iter().all(|(key, _)| seen.insert(key.as_str())) {
            return Err(OAuthError::invalid_request(REPEATED_PARAMETER));
        }

        let mut form = Self::default();
        for (key, value) in params {
            let slot = match key.as_str() {
                "grant_type" => &mut form.grant_type,
                "scope" => &mut form.scope,
                "username" => &mut form.username,
                "password" => &mut form.password,
                _ => continue,
            };
            slot.clone_from(value);
        }
        Ok(form)
    }
}

/// Grants this endpoint can issue tokens for.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    ClientCredentials,
    Password { username: String, password: String },
}

impl Grant {
    /// Select the grant named by `grant_type`.
    pub fn from_form(form: &TokenForm) -> OAuthResult<Self> {
        match GrantType::from_wire(&form.grant_type) {
            Some(GrantType::ClientCredentials) => Ok(Self::ClientCredentials),
            Some(GrantType::ResourceOwnerPassword) => Ok(Self::Password {
                username: form.username.clone(),
                password: form.password.clone(),
            }),
            _ => Err(OAuthError::UnsupportedGrantType),
        }
    }

    #[must_use]
    pub const fn grant_type(&self) -> GrantType {
        match self {
            Self::ClientCredentials => GrantType::ClientCredentials,
            Self::Password { .. } => GrantType::ResourceOwnerPassword,
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientCredentials => f.write_str("ClientCredentials"),
            Self::Password { username, .. } => {
                f.debug_struct("Password").field("username", username).finish()
            }
        }
    }
}

/// Runs token requests through the verification sequence.
#[derive(Debug, Clone)]
pub struct GrantDispatcher {
    store: IdentityStore,
    minter: TokenMinter,
}

impl GrantDispatcher {
    #[must_use]
    pub const fn new(store: IdentityStore, minter: TokenMinter) -> Self {
        Self { store, minter }
    }

    /// Lifetime of the tokens this dispatcher issues.
    #[must_use]
    pub const fn token_lifetime(&self) -> std::time::Duration {
        self.minter.lifetime()
    }

    /// Verify `request` and issue a token, or reject it with the first
    /// failing check.
    pub async fn dispatch(&self, request: TokenRequest) -> OAuthResult<Token> {
        let mut stage = Stage::ReceivedRequest;
        let result = self.run(request, &mut stage).await;
        match &result {
            Ok(token) => tracing::debug!(client = %token.client, %stage, "Token request granted"),
            Err(OAuthError::Server(e)) => {
                tracing::error!(%stage, error = %e, "Token request failed");
            }
            Err(e) => tracing::info!(%stage, error = e.code(), "Token request rejected"),
        }
        result
    }

    async fn run(&self, request: TokenRequest, stage: &mut Stage) -> OAuthResult<Token> {
        if request.method != Method::POST {
            return Err(OAuthError::MethodNotAllowed);
        }
        *stage = Stage::ValidatedMethod;

        let form = TokenForm::from_params(&request.params)?;
        *stage = Stage::ValidatedForm;

        let grant = Grant::from_form(&form)?;
        let grant_type = grant.grant_type();

        let client = self.authenticate_client(request.credentials.as_ref()).await?;
        *stage = Stage::ClientAuthenticated;

        let user = match &grant {
            Grant::ClientCredentials => String::new(),
            Grant::Password { username, password } => {
                self.authenticate_resource_owner(username, password).await?;
                *stage = Stage::ResourceOwnerAuthenticated;
                username.clone()
            }
        };

        if client.grants.for_grant(grant_type).is_none() {
            return Err(OAuthError::UnauthorizedClient);
        }
        *stage = Stage::GrantAuthorized;

        if !verify::verify_grant_scopes(&client, grant_type, &form.scope) {
            return Err(OAuthError::InvalidScope);
        }
        *stage = Stage::ScopeAuthorized;

        let token = self.minter.issue_token(&client.username, &user, grant_type, &form.scope).await?;
        *stage = Stage::TokenIssued;
        Ok(token)
    }

    async fn authenticate_client(
        &self,
        credentials: Option<&ClientCredentials>,
    ) -> OAuthResult<Client> {
        let credentials = credentials.ok_or(OAuthError::InvalidClient)?;
        let client = self
            .store
            .get_client(&credentials.username)
            .await?
            .ok_or(OAuthError::InvalidClient)?;

        if !verify::verify_client_password(&client, &credentials.password) {
            return Err(OAuthError::InvalidClient);
        }
        Ok(client)
    }

    async fn authenticate_resource_owner(&self, username: &str, password: &str) -> OAuthResult<()> {
        if username.is_empty() || password.is_empty() {
            return Err(OAuthError::InvalidGrant);
        }
        let user = self.store.get_user(username).await?.ok_or(OAuthError::InvalidGrant)?;
        if !verify::verify_user_password(&user, password) {
            return Err(OAuthError::InvalidGrant);
        }
        Ok(())
    }
}
