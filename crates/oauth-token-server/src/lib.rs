//! OAuth2 Token Server
//!
//! The token-issuance core of an OAuth2 authorization server: authenticates
//! clients and resource owners, enforces per-client granted scopes, mints
//! bearer tokens and persists them in an embedded transactional store.
//!
//! # Features
//!
//! - **Grants**: `client_credentials` and `password` (resource owner)
//! - **Storage**: `redb` tables for clients, users and tokens with
//!   create-if-absent writes
//! - **Lifecycle**: optional TLS, per-connection tracking, graceful drain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oauth_token_server::{
//!     config::Config,
//!     server::{self, AppContext, Listener, Server},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let ctx = Arc::new(AppContext::from_config(&config)?);
//!     let listener = Listener::bind(&config.server).await?;
//!
//!     let status = Server::new(listener, server::create_router(ctx))
//!         .run(server::shutdown_signal())
//!         .await;
//!     std::process::exit(status.code().into());
//! }
//! ```

pub mod config;
pub mod error;
pub mod oauth;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{OAuthError, ServerError, StoreError};
pub use store::IdentityStore;
