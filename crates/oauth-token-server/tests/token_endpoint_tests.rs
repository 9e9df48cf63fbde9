//! End-to-end tests for the token endpoint through the axum Router.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum_extra::headers::{Authorization, HeaderMapExt};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use oauth_token_server::oauth::digest::SaltedDigest;
use oauth_token_server::oauth::{AlphanumericGenerator, TokenGenerator, TokenMinter};
use oauth_token_server::server::{AppContext, create_router};
use oauth_token_server::store::{Client, GrantType, IdentityStore, User};

const TOKEN_PATH: &str = "/oauth2/token";

/// Counts how many tokens the minter asked for.
#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

impl TokenGenerator for CountingGenerator {
    fn generate(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AlphanumericGenerator::default().generate()
    }
}

struct TestApp {
    store: IdentityStore,
    router: axum::Router,
    generator: Arc<CountingGenerator>,
}

impl TestApp {
    async fn new() -> Self {
        let store = IdentityStore::in_memory().unwrap();

        let secret = SaltedDigest::generate("p1");
        let acme = Client::new("acme")
            .with_credentials(secret.digest, secret.salt)
            .with_grant(GrantType::ClientCredentials, ["read"])
            .with_grant(GrantType::ResourceOwnerPassword, ["read", "profile"]);
        store.put_client(acme).await.unwrap();

        let secret = SaltedDigest::generate("p2");
        let bare = Client::new("bare").with_credentials(secret.digest, secret.salt);
        store.put_client(bare).await.unwrap();

        let secret = SaltedDigest::generate("hunter2");
        let alice = User::new("u-1", "alice").with_credentials(secret.digest, secret.salt);
        store.put_user(alice).await.unwrap();

        let generator = Arc::new(CountingGenerator::default());
        let minter = TokenMinter::with_generator(store.clone(), generator.clone());
        let ctx = AppContext::with_minter(store.clone(), minter);
        Self { store, router: create_router(Arc::new(ctx)), generator }
    }

    fn minted(&self) -> usize {
        self.generator.calls.load(Ordering::SeqCst)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
        (status, headers, json)
    }

    async fn token(
        &self,
        client: Option<(&str, &str)>,
        form: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        self.send(form_request(Method::POST, TOKEN_PATH, client, form)).await
    }
}

fn form_request(
    method: Method,
    uri: &str,
    client: Option<(&str, &str)>,
    form: &[(&str, &str)],
) -> Request<Body> {
    let body = serde_urlencoded::to_string(form).unwrap();
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    if let Some((username, password)) = client {
        request.headers_mut().typed_insert(Authorization::basic(username, password));
    }
    request
}

#[tokio::test]
async fn test_client_credentials_end_to_end() {
    let app = TestApp::new().await;
    let before = Utc::now();

    let (status, headers, body) = app
        .token(Some(("acme", "p1")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read");

    let access_token = body["access_token"].as_str().unwrap();
    assert_eq!(access_token.len(), 8);

    let stored = app.store.get_token("acme", access_token).await.unwrap().unwrap();
    assert_eq!(stored.client, "acme");
    assert_eq!(stored.token, access_token);
    assert!(stored.user.is_empty());
    assert_eq!(stored.scopes, "read");
    let lifetime = (stored.expires_at - before).num_seconds();
    assert!((3599..=3601).contains(&lifetime), "lifetime {lifetime}");
    assert!(!stored.is_expired());
}

#[tokio::test]
async fn test_password_grant_end_to_end() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .token(
            Some(("acme", "p1")),
            &[
                ("grant_type", "password"),
                ("username", "alice"),
                ("password", "hunter2"),
                ("scope", "read profile"),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "read profile");
    let access_token = body["access_token"].as_str().unwrap();
    let stored = app.store.get_token("acme", access_token).await.unwrap().unwrap();
    assert_eq!(stored.user, "alice");
}

#[tokio::test]
async fn test_parameters_from_query_string() {
    let app = TestApp::new().await;
    let request = form_request(
        Method::POST,
        "/oauth2/token?scope=read",
        Some(("acme", "p1")),
        &[("grant_type", "client_credentials")],
    );
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "read");
}

#[tokio::test]
async fn test_wrong_client_password() {
    let app = TestApp::new().await;
    let (status, headers, body) = app
        .token(Some(("acme", "nope")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Basic");
    assert_eq!(
        body,
        json!({ "error": "invalid_client", "error_description": "client authentication failed" })
    );
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_unknown_client_looks_like_wrong_password() {
    let app = TestApp::new().await;
    let (status, _, unknown) = app
        .token(Some(("ghost", "p1")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;
    let (_, _, wrong) = app
        .token(Some(("acme", "p9")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, wrong);
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_missing_basic_auth() {
    let app = TestApp::new().await;
    let (status, _, body) =
        app.token(None, &[("grant_type", "client_credentials"), ("scope", "read")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_wrong_user_password_and_unknown_user() {
    let app = TestApp::new().await;
    for (username, password) in [("alice", "wrong"), ("bob", "hunter2"), ("alice", "")] {
        let (status, _, body) = app
            .token(
                Some(("acme", "p1")),
                &[
                    ("grant_type", "password"),
                    ("username", username),
                    ("password", password),
                    ("scope", "read"),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{username}/{password}");
        assert_eq!(body["error"], "invalid_grant");
    }
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_client_without_grant_is_unauthorized() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .token(Some(("bare", "p2")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unauthorized_client");
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_scope_outside_authorization() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .token(
            Some(("acme", "p1")),
            &[("grant_type", "client_credentials"), ("scope", "read,admin")],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_empty_scope_is_not_implicitly_allowed() {
    let app = TestApp::new().await;
    let (status, _, body) =
        app.token(Some(("acme", "p1")), &[("grant_type", "client_credentials")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");
}

#[tokio::test]
async fn test_stored_empty_scope_grant_allows_request_without_scope() {
    let app = TestApp::new().await;
    let secret = SaltedDigest::generate("p3");
    let open = Client::new("open")
        .with_credentials(secret.digest, secret.salt)
        .with_grant(GrantType::ClientCredentials, [""]);
    app.store.put_client(open).await.unwrap();

    let (status, _, body) =
        app.token(Some(("open", "p3")), &[("grant_type", "client_credentials")]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.get("scope").is_none());

    let access_token = body["access_token"].as_str().unwrap();
    let stored = app.store.get_token("open", access_token).await.unwrap().unwrap();
    assert!(stored.scopes.is_empty());

    let (status, _, body) = app
        .token(Some(("open", "p3")), &[("grant_type", "client_credentials"), ("scope", "read")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");
}

#[tokio::test]
async fn test_repeated_parameter_rejected() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .token(
            Some(("acme", "p1")),
            &[
                ("grant_type", "client_credentials"),
                ("grant_type", "client_credentials"),
                ("scope", "read"),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "error": "invalid_request",
            "error_description": "request parameters must not be included more than once"
        })
    );
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_repeat_across_query_and_body_rejected() {
    let app = TestApp::new().await;
    let request = form_request(
        Method::POST,
        "/oauth2/token?scope=read",
        Some(("acme", "p1")),
        &[("grant_type", "client_credentials"), ("scope", "read")],
    );
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .token(Some(("acme", "p1")), &[("grant_type", "authorization_code"), ("code", "x")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_non_post_methods_rejected() {
    let app = TestApp::new().await;
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let request = form_request(
            method.clone(),
            TOKEN_PATH,
            Some(("acme", "p1")),
            &[("grant_type", "client_credentials"), ("scope", "read")],
        );
        let (status, headers, body) = app.send(request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(headers[header::ALLOW], "POST");
        assert_eq!(body, Value::Null);
    }
    assert_eq!(app.minted(), 0);
}

#[tokio::test]
async fn test_each_success_mints_a_distinct_token() {
    let app = TestApp::new().await;
    let mut issued = std::collections::HashSet::new();
    for _ in 0..10 {
        let (status, _, body) = app
            .token(Some(("acme", "p1")), &[("grant_type", "client_credentials"), ("scope", "read")])
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(issued.insert(body["access_token"].as_str().unwrap().to_owned()));
    }
}
