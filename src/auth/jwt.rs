//! Bearer token decoding against the identity provider's published keys
//!
//! The decoded claims are only used to decide whether a token is stale enough
//! to refresh before a call. Signatures are always verified; expiry is
//! verified only on request.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use super::provider::IdentityProvider;
use crate::error::{Error, Result};

/// Claims relevant to token liveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    pub expiry: DateTime<Utc>,
    pub issuer: String,
    pub key_id: String,
}

impl ClaimSet {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry < now
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(default)]
    iss: String,
}

/// Decodes tokens using a lazily fetched, process-lifetime JWKS cache.
pub struct TokenValidator {
    provider: Arc<dyn IdentityProvider>,
    jwks: OnceCell<JwkSet>,
    refetched: Mutex<Option<JwkSet>>,
    refetch_on_unknown_key: bool,
}

impl TokenValidator {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            jwks: OnceCell::new(),
            refetched: Mutex::new(None),
            refetch_on_unknown_key: false,
        }
    }

    /// Re-fetch the key set once when a token names a key id the cache lacks.
    ///
    /// Off by default: the cached keys are assumed stable for the process.
    pub fn refetch_on_unknown_key(mut self, enabled: bool) -> Self {
        self.refetch_on_unknown_key = enabled;
        self
    }

    async fn cached_keys(&self) -> Result<&JwkSet> {
        self.jwks
            .get_or_try_init(|| async {
                let keys = self.provider.fetch_jwks().await?;
                tracing::debug!("Cached {} signing keys", keys.keys.len());
                Ok::<_, Error>(keys)
            })
            .await
    }

    /// Decode `token`, verifying its RS256 signature and, if asked, its expiry.
    ///
    /// Issued-at and not-before are never checked.
    pub async fn decode(&self, token: &str, verify_expiry: bool) -> Result<ClaimSet> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| Error::Decode("token header has no key id".to_string()))?;

        let key = match self.cached_keys().await?.find(&kid) {
            Some(jwk) => DecodingKey::from_jwk(jwk)?,
            None => self.key_after_refetch(&kid).await?,
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = verify_expiry;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let data = decode::<RawClaims>(token, &key, &validation)?;
        let expiry = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| Error::Decode(format!("exp {} out of range", data.claims.exp)))?;

        Ok(ClaimSet {
            expiry,
            issuer: data.claims.iss,
            key_id: kid,
        })
    }

    async fn key_after_refetch(&self, kid: &str) -> Result<DecodingKey> {
        let unknown = || Error::Decode(format!("signing key {} not found in JWKS", kid));
        if !self.refetch_on_unknown_key {
            return Err(unknown());
        }

        let mut refetched = self.refetched.lock().await;
        if let Some(jwk) = refetched.as_ref().and_then(|keys| keys.find(kid)) {
            return Ok(DecodingKey::from_jwk(jwk)?);
        }

        tracing::info!("Key id {} not cached, re-fetching JWKS", kid);
        let keys = self.provider.fetch_jwks().await?;
        let key = keys.find(kid).map(DecodingKey::from_jwk).transpose()?;
        *refetched = Some(keys);
        key.ok_or_else(unknown)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! RSA test key and a scripted identity provider shared by the auth and
    //! api tests.

    use super::*;
    use crate::auth::provider::Profile;
    use crate::auth::tokens::TokenSet;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const TEST_KID: &str = "test-key";

    const TEST_KEY_PEM: &str = include_str!("../../testdata/test_rsa_key.pem");
    const TEST_KEY_N: &str = include_str!("../../testdata/test_rsa_key.n");

    pub fn test_jwks(kid: &str) -> JwkSet {
        serde_json::from_value(json!({
            "keys": [{
                "kty": "RSA",
                "kid": kid,
                "alg": "RS256",
                "use": "sig",
                "n": TEST_KEY_N.trim(),
                "e": "AQAB"
            }]
        }))
        .unwrap()
    }

    /// Sign a token expiring `expires_in` seconds from now (negative = past).
    pub fn signed_token(kid: &str, subject: &str, expires_in: i64) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let claims = json!({
            "sub": subject,
            "iss": "https://cognito-idp.us-east-2.amazonaws.com/us-east-2_ghlOXVLi1",
            "exp": Utc::now().timestamp() + expires_in,
            "iat": Utc::now().timestamp(),
        });
        let key = EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    /// Token triple whose access token expires `expires_in` seconds from now.
    pub fn token_set(tag: &str, expires_in: i64) -> TokenSet {
        TokenSet::new(
            signed_token(TEST_KID, tag, expires_in),
            format!("id-{}", tag),
            format!("refresh-{}", tag),
            "Bearer",
        )
    }

    /// Identity provider that hands out numbered token sets and counts calls.
    #[derive(Default)]
    pub struct FakeProvider {
        pub logins: AtomicUsize,
        pub refreshes: AtomicUsize,
        pub jwks_fetches: AtomicUsize,
        pub reject_refresh: bool,
        pub jwks_kid: Option<String>,
        /// Key id served from the second JWKS fetch on.
        pub rotated_kid: Option<String>,
    }

    impl FakeProvider {
        pub fn logins(&self) -> usize {
            self.logins.load(Ordering::SeqCst)
        }

        pub fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }

        pub fn jwks_fetches(&self) -> usize {
            self.jwks_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn password_login(&self, username: &str, password: &str) -> Result<TokenSet> {
            if password != "correct" {
                return Err(Error::AuthRejected(format!("bad password for {}", username)));
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(token_set(&format!("login{}", n), 3600))
        }

        async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet> {
            if self.reject_refresh {
                return Err(Error::AuthRejected("refresh token revoked".to_string()));
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            let mut fresh = token_set(&format!("refresh{}", n), 3600);
            fresh.refresh_token = tokens.refresh_token.clone();
            Ok(fresh)
        }

        async fn fetch_jwks(&self) -> Result<JwkSet> {
            let previous = self.jwks_fetches.fetch_add(1, Ordering::SeqCst);
            let kid = match (&self.rotated_kid, previous) {
                (Some(rotated), n) if n > 0 => rotated.as_str(),
                _ => self.jwks_kid.as_deref().unwrap_or(TEST_KID),
            };
            Ok(test_jwks(kid))
        }

        async fn get_profile(&self, tokens: &TokenSet) -> Result<Profile> {
            if tokens.is_empty() {
                return Err(Error::Unauthenticated);
            }
            Ok(Profile {
                username: "abc-123".to_string(),
                email: Some("user@example.com".to_string()),
            })
        }
    }
}
