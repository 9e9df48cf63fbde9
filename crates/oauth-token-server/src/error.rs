//! Error types for the token server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use axum::http::StatusCode;

/// Errors from the identity store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A record already exists under the key (create-if-absent violated).
    #[error("duplicate {namespace} key: {key}")]
    DuplicateKey {
        /// Namespace the collision happened in (`client`, `user`, `token`)
        namespace: &'static str,
        /// Natural key of the colliding record
        key: String,
    },

    /// A record was submitted without its natural key.
    #[error("{namespace} record has an empty key")]
    EmptyKey {
        /// Namespace of the rejected record
        namespace: &'static str,
    },

    /// A stored field could not be decoded.
    #[error("corrupt field '{field}': {reason}")]
    Corrupt {
        /// Field name inside the record
        field: &'static str,
        /// What was wrong with the stored bytes
        reason: String,
    },

    /// Database could not be opened or created.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction could not be started.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table could not be opened.
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    /// Read or write on an open table failed.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// Commit failed; the transaction was rolled back.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// The blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Create a duplicate key error.
    #[must_use]
    pub fn duplicate(namespace: &'static str, key: impl Into<String>) -> Self {
        Self::DuplicateKey { namespace, key: key.into() }
    }

    /// Create a corrupt field error.
    #[must_use]
    pub fn corrupt(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt { field, reason: reason.into() }
    }

    /// Returns true if this error is a create-if-absent collision.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

/// Rejections produced by the token endpoint.
///
/// Every protocol variant maps to an RFC 6749 §5.2 error code. `Server` wraps
/// internal failures; its detail is logged and never sent to the caller.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// Request used a method other than POST.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Request is malformed (e.g. a repeated parameter).
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client credentials missing, unknown client, or wrong client password.
    #[error("invalid_client")]
    InvalidClient,

    /// Resource-owner credentials missing or wrong.
    #[error("invalid_grant")]
    InvalidGrant,

    /// Client is not provisioned for the requested grant type.
    #[error("unauthorized_client")]
    UnauthorizedClient,

    /// Grant type not recognized by this endpoint.
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,

    /// Requested scope exceeds what the client may be granted.
    #[error("invalid_scope")]
    InvalidScope,

    /// Internal or storage failure.
    #[error("server error: {0}")]
    Server(#[from] StoreError),
}

impl OAuthError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    /// Wire error code (`error` member of the response).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::Server(_) => "server_error",
        }
    }

    /// Human readable description (`error_description` member), if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest(description) => Some(description.as_str()),
            Self::InvalidClient => Some("client authentication failed"),
            Self::InvalidGrant => {
                Some("the provided authorization grant or refresh token is invalid")
            }
            Self::UnauthorizedClient => Some(
                "the authenticated client is not authorized to use this authorization grant type",
            ),
            Self::UnsupportedGrantType => Some(
                "the authorization grant type is not supported by the authorization server",
            ),
            Self::InvalidScope => Some("the request scope is invalid"),
            Self::MethodNotAllowed | Self::Server(_) => None,
        }
    }

    /// HTTP status for this rejection.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Startup failures of the listener.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    /// TLS enabled without both a certificate and a key.
    #[error("TLS is enabled but the {missing} file is not configured")]
    MissingTlsMaterial {
        /// Which setting is missing
        missing: &'static str,
    },

    /// Certificate file contained no PEM certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(String),

    /// Key file contained no PEM private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    /// PEM file could not be parsed.
    #[error("PEM error: {0}")]
    Pem(#[from] rustls::pki_types::pem::Error),

    /// rustls rejected the certificate/key pair.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// Bind or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for token endpoint operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detection() {
        assert!(StoreError::duplicate("token", "acme/abc").is_duplicate());
        assert!(!StoreError::corrupt("expire-time", "short").is_duplicate());
        assert!(!StoreError::EmptyKey { namespace: "client" }.is_duplicate());
    }

    #[test]
    fn test_oauth_error_statuses() {
        assert_eq!(OAuthError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(OAuthError::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthError::InvalidGrant.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::InvalidScope.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::UnauthorizedClient.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::UnsupportedGrantType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::invalid_request("dup").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            OAuthError::from(StoreError::corrupt("x", "y")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_error_hides_detail() {
        let err = OAuthError::from(StoreError::corrupt("client_password", "secret detail"));
        assert_eq!(err.code(), "server_error");
        assert!(err.description().is_none());
    }

    #[test]
    fn test_invalid_request_keeps_description() {
        let err = OAuthError::invalid_request("request parameters must not be included more than once");
        assert_eq!(err.code(), "invalid_request");
        assert_eq!(
            err.description(),
            Some("request parameters must not be included more than once")
        );
    }
}
