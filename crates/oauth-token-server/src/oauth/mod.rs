//! OAuth2 token issuance.
//!
//! - [`digest`]: salted password digests
//! - [`verify`]: credential verification and scope authorization
//! - [`minter`]: token generation with collision retry
//! - [`grant`]: the grant dispatcher
//! - [`handlers`], [`types`]: the HTTP surface

pub mod digest;
pub mod grant;
pub mod handlers;
pub mod minter;
pub mod types;
pub mod verify;

pub use grant::{ClientCredentials, Grant, GrantDispatcher, Stage, TokenForm, TokenRequest};
pub use minter::{AlphanumericGenerator, TokenGenerator, TokenMinter};
pub use types::{ErrorResponse, TokenResponse};
