//! HTTP handler for the token endpoint.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri, header},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};

use super::grant::{ClientCredentials, TokenRequest};
use super::types::TokenResponse;
use crate::error::OAuthError;
use crate::server::AppContext;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `/oauth2/token`, routed for every method.
///
/// Parameters come from the query string and, for form-encoded POST bodies,
/// from the body. Client credentials come from HTTP Basic authentication.
pub async fn handle_token(
    State(ctx): State<Arc<AppContext>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = match request_params(&method, &uri, &headers, &body) {
        Ok(params) => params,
        Err(_) if method != Method::POST => return OAuthError::MethodNotAllowed.into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable token request parameters");
            return OAuthError::invalid_request("malformed request parameters").into_response();
        }
    };

    let credentials = headers
        .typed_get::<Authorization<Basic>>()
        .map(|auth| ClientCredentials::new(auth.username(), auth.password()));

    let request = TokenRequest { method, credentials, params };
    match ctx.dispatcher.dispatch(request).await {
        Ok(token) => TokenResponse::issued(&token, ctx.dispatcher.token_lifetime()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Collect query and body parameters in arrival order.
fn request_params(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Vec<(String, String)>, serde_urlencoded::de::Error> {
    let mut params: Vec<(String, String)> = match uri.query() {
        Some(query) => serde_urlencoded::from_str(query)?,
        None => Vec::new(),
    };

    if *method == Method::POST && is_form(headers) {
        params.extend(serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)?);
    }
    Ok(params)
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}
