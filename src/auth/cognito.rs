//! Cognito user pool client
//!
//! Speaks the Cognito JSON API directly: `InitiateAuth` with SRP password
//! verification or a refresh token, `GetUser` for the profile, and the pool's
//! well-known JWKS document for signing keys.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::provider::{IdentityProvider, Profile};
use super::srp::{self, PasswordVerifier, SrpClient, PASSWORD_VERIFIER};
use super::tokens::TokenSet;
use super::AuthConfig;
use crate::error::{Error, Result};

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
    #[serde(default)]
    challenge_parameters: HashMap<String, String>,
    session: Option<String>,
}

impl InitiateAuthResponse {
    fn into_result(self, flow: &str) -> Result<AuthenticationResult> {
        match self.authentication_result {
            Some(result) => Ok(result),
            None => Err(Error::AuthRejected(format!(
                "{} returned challenge {} instead of tokens",
                flow,
                self.challenge_name.as_deref().unwrap_or("(none)")
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    id_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetUserResponse {
    username: String,
    #[serde(default)]
    user_attributes: Vec<UserAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserAttribute {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CognitoFault {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: HashMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RespondToAuthChallengeRequest<'a> {
    client_id: &'a str,
    challenge_name: &'a str,
    challenge_responses: HashMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,
}

/// [`IdentityProvider`] backed by a Cognito user pool.
pub struct CognitoProvider {
    http: reqwest::Client,
    config: AuthConfig,
}

impl CognitoProvider {
    pub fn new(config: AuthConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: AuthConfig) -> Self {
        Self { http, config }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/", self.config.endpoint());
        tracing::debug!("Cognito {} at {}", action, url);

        let resp = self
            .http
            .post(&url)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .body(body.to_string())
            .send()
            .await?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(Error::ServerUnavailable {
                status: status.as_u16(),
                url,
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let fault: CognitoFault = serde_json::from_str(&text).unwrap_or_default();
            let kind = fault.kind.rsplit('#').next().unwrap_or_default();
            return Err(Error::AuthRejected(format!(
                "Cognito {} failed (HTTP {}): {} {}",
                action,
                status.as_u16(),
                kind,
                fault.message
            )));
        }

        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(format!("Cognito {}: {}", action, e)))
    }

    async fn initiate_auth(
        &self,
        flow: &str,
        parameters: HashMap<&str, &str>,
    ) -> Result<InitiateAuthResponse> {
        let request = InitiateAuthRequest {
            auth_flow: flow,
            client_id: &self.config.client_id,
            auth_parameters: parameters,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        self.call("InitiateAuth", &body).await
    }

    /// Answer the `PASSWORD_VERIFIER` challenge of an SRP exchange.
    async fn verify_password(
        &self,
        srp: &SrpClient,
        challenge: InitiateAuthResponse,
        password: &str,
    ) -> Result<AuthenticationResult> {
        match challenge.challenge_name.as_deref() {
            Some(PASSWORD_VERIFIER) => {}
            other => {
                return Err(Error::AuthRejected(format!(
                    "USER_SRP_AUTH returned challenge {} instead of {}",
                    other.unwrap_or("(none)"),
                    PASSWORD_VERIFIER
                )))
            }
        }

        let verifier = PasswordVerifier::from_parameters(&challenge.challenge_parameters)?;
        let timestamp = srp::timestamp(chrono::Utc::now());
        let signature = srp.password_claim(&verifier, password, &timestamp)?;

        let request = RespondToAuthChallengeRequest {
            client_id: &self.config.client_id,
            challenge_name: PASSWORD_VERIFIER,
            challenge_responses: HashMap::from([
                ("USERNAME", verifier.user_id.as_str()),
                ("TIMESTAMP", timestamp.as_str()),
                ("PASSWORD_CLAIM_SECRET_BLOCK", verifier.secret_block.as_str()),
                ("PASSWORD_CLAIM_SIGNATURE", signature.as_str()),
            ]),
            session: challenge.session.as_deref(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let resp: InitiateAuthResponse = self.call("RespondToAuthChallenge", &body).await?;
        resp.into_result(PASSWORD_VERIFIER)
    }
}

#[async_trait]
impl IdentityProvider for CognitoProvider {
    async fn password_login(&self, username: &str, password: &str) -> Result<TokenSet> {
        tracing::info!("Authenticating with username and password (SRP)...");
        let srp = SrpClient::new(&self.config.user_pool)?;
        let srp_a = srp.public_hex();
        let params = HashMap::from([("USERNAME", username), ("SRP_A", srp_a.as_str())]);
        let challenge = self.initiate_auth("USER_SRP_AUTH", params).await?;
        let result = self.verify_password(&srp, challenge, password).await?;

        let refresh_token = result.refresh_token.ok_or_else(|| {
            Error::InvalidResponse("password login returned no refresh token".to_string())
        })?;
        Ok(TokenSet::new(
            result.access_token,
            result.id_token,
            refresh_token,
            result.token_type.unwrap_or_else(|| "Bearer".to_string()),
        ))
    }

    async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet> {
        if tokens.refresh_token.is_empty() {
            return Err(Error::Unauthenticated);
        }
        tracing::info!("Refreshing Cognito tokens...");
        let params = HashMap::from([("REFRESH_TOKEN", tokens.refresh_token.as_str())]);
        let result = self
            .initiate_auth("REFRESH_TOKEN_AUTH", params)
            .await?
            .into_result("REFRESH_TOKEN_AUTH")?;

        Ok(TokenSet::new(
            result.access_token,
            result.id_token,
            result
                .refresh_token
                .unwrap_or_else(|| tokens.refresh_token.clone()),
            result
                .token_type
                .unwrap_or_else(|| tokens.token_type.clone()),
        ))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet> {
        let url = self.config.jwks_url();
        tracing::debug!("Fetching JWKS from {}", url);

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::ServerUnavailable {
                status: status.as_u16(),
                url,
            });
        }
        resp.json::<JwkSet>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("JWKS: {}", e)))
    }

    async fn get_profile(&self, tokens: &TokenSet) -> Result<Profile> {
        let body = json!({ "AccessToken": tokens.access_token });
        let user: GetUserResponse = self.call("GetUser", &body).await?;

        let email = user
            .user_attributes
            .into_iter()
            .find(|a| a.name == "email")
            .and_then(|a| a.value);
        Ok(Profile {
            username: user.username,
            email,
        })
    }
}
