//! Identity provider seam
//!
//! The session only needs four things from the provider; anything that speaks
//! the same OAuth/JWT-bearer shape can stand in for Cognito.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;

use super::tokens::TokenSet;
use crate::error::Result;

/// Profile attributes of the authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Full username/password exchange.
    async fn password_login(&self, username: &str, password: &str) -> Result<TokenSet>;

    /// Mint new tokens from the refresh token in `tokens`.
    ///
    /// The returned set is complete; providers that do not rotate the refresh
    /// token carry the old one over.
    async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet>;

    /// Public signing keys of the issuer.
    async fn fetch_jwks(&self) -> Result<JwkSet>;

    async fn get_profile(&self, tokens: &TokenSet) -> Result<Profile>;
}
