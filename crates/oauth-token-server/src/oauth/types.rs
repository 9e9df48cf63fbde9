//! Token endpoint response bodies.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::config::oauth::TOKEN_TYPE;
use crate::error::OAuthError;
use crate::store::Token;

/// Successful token response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl TokenResponse {
    /// Describe an issued token valid for `lifetime`.
    #[must_use]
    pub fn issued(token: &Token, lifetime: Duration) -> Self {
        Self {
            access_token: token.token.clone(),
            token_type: TOKEN_TYPE.to_owned(),
            expires_in: lifetime.as_secs(),
            scope: token.scopes.clone(),
        }
    }
}

/// Error response (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&OAuthError> for ErrorResponse {
    fn from(err: &OAuthError) -> Self {
        Self { error: err.code().to_owned(), error_description: err.description().map(str::to_owned) }
    }
}

/// Token responses must never be cached.
fn disable_caching(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self).into_response();
        disable_caching(response.headers_mut());
        response
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = match &self {
            Self::MethodNotAllowed => {
                ([(header::ALLOW, HeaderValue::from_static("POST"))], status).into_response()
            }
            _ => (status, Json(ErrorResponse::from(&self))).into_response(),
        };

        let headers = response.headers_mut();
        disable_caching(headers);
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        }
        response
    }
}
