//! Authentication module for the Emporia API
//!
//! Sessions are established against the Emporia Cognito user pool, either
//! with a username/password exchange or from a stored token triple. The API
//! itself is called with the Cognito identity token.

pub mod cognito;
pub mod jwt;
pub mod provider;
pub mod session;
mod srp;
pub mod tokens;

pub use cognito::CognitoProvider;
pub use jwt::{ClaimSet, TokenValidator};
pub use provider::{IdentityProvider, Profile};
pub use session::{Credentials, Session, SessionState};
pub use tokens::{CredentialStore, StoredSession, TokenSet, TokenSink};

/// Cognito user pool configuration for Emporia
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// App client ID (public client, no secret)
    pub client_id: String,
    /// User pool ID
    pub user_pool: String,
    /// AWS region hosting the pool
    pub region: String,
    /// Override for the Cognito endpoint, used by tests and simulators
    pub endpoint: Option<String>,
}

impl AuthConfig {
    /// Base URL for Cognito API calls.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://cognito-idp.{}.amazonaws.com", self.region),
        }
    }

    /// Token issuer for the pool.
    pub fn issuer(&self) -> String {
        format!("{}/{}", self.endpoint(), self.user_pool)
    }

    /// Well-known JWKS location derived from the issuer.
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: "4qte47jbstod8apnfic0bunmrq".to_string(),
            user_pool: "us-east-2_ghlOXVLi1".to_string(),
            region: "us-east-2".to_string(),
            endpoint: None,
        }
    }
}
