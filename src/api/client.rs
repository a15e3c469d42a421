//! Authenticated HTTP client for the Emporia API
//!
//! Every call goes through [`VueClient::execute`], which refreshes stale
//! tokens before sending, refreshes and resends once on 401, and retries
//! server errors with bounded exponential backoff.

use chrono::Utc;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use super::retry::RetryPolicy;
use crate::auth::{
    ClaimSet, Credentials, IdentityProvider, Session, TokenSet, TokenSink, TokenValidator,
};
use crate::error::{Error, Result};

pub const API_ROOT: &str = "https://api.emporiaenergy.com";

/// Transport and retry settings consumed by the client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_root: String,
    /// Bounds connection setup of a single attempt.
    pub connect_timeout: Duration,
    /// Bounds the rest of a single attempt once connected.
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_root: API_ROOT.to_string(),
            connect_timeout: Duration::from_secs_f64(6.03),
            read_timeout: Duration::from_secs_f64(10.03),
            retry: RetryPolicy::default(),
        }
    }
}

/// Resilient request executor owning the one session of this process.
///
/// All token replacement goes through the session mutex, so concurrent
/// callers never spend the same refresh token twice.
pub struct VueClient {
    http: reqwest::Client,
    api_root: Url,
    retry: RetryPolicy,
    provider: Arc<dyn IdentityProvider>,
    validator: TokenValidator,
    session: Mutex<Option<Session>>,
}

impl VueClient {
    pub fn new(options: ClientOptions, provider: Arc<dyn IdentityProvider>) -> Result<Self> {
        let mut api_root = Url::parse(&options.api_root)
            .map_err(|e| Error::Config(format!("api_root {:?}: {}", options.api_root, e)))?;
        if !api_root.path().ends_with('/') {
            let path = format!("{}/", api_root.path());
            api_root.set_path(&path);
        }

        // reqwest 0.11 only has a whole-request timeout; give it both budgets.
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.connect_timeout + options.read_timeout)
            .build()?;

        Ok(Self {
            http,
            api_root,
            retry: options.retry,
            validator: TokenValidator::new(provider.clone()),
            provider,
            session: Mutex::new(None),
        })
    }

    /// Replace the default validator, e.g. to enable JWKS re-fetching.
    pub fn with_validator(mut self, validator: TokenValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Establish the session used by every later call.
    pub async fn authenticate(
        &self,
        credentials: Credentials,
        sink: Option<Box<dyn TokenSink>>,
    ) -> Result<()> {
        let session = Session::authenticate(self.provider.clone(), credentials, sink).await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    /// Force a token renewal.
    pub async fn refresh(&self) -> Result<TokenSet> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::Unauthenticated)?;
        Ok(session.refresh().await?.clone())
    }

    /// Email of the logged-in user.
    pub async fn username(&self) -> Result<String> {
        let mut guard = self.session.lock().await;
        guard
            .as_mut()
            .ok_or(Error::Unauthenticated)?
            .username()
            .await
    }

    /// Decoded claims of the current access token (expiry not enforced).
    pub async fn claims(&self) -> Result<ClaimSet> {
        let access_token = self.current_tokens().await?.access_token;
        self.validator.decode(&access_token, false).await
    }

    pub async fn current_tokens(&self) -> Result<TokenSet> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(Error::Unauthenticated)?;
        Ok(session.tokens()?.clone())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.api_root
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("bad API path {:?}: {}", path, e)))
    }

    /// Send `method path` with retries.
    ///
    /// A non-401 response below 500 is returned as-is; after the attempt
    /// budget is spent on server errors the last response is returned as-is.
    /// Transport failures are not retried here.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = self.url(path)?;
        self.refresh_if_expired().await?;

        let is_server_error = |resp: &Response| {
            let status = resp.status();
            if status.is_server_error() {
                tracing::warn!(status = status.as_u16(), "{} {} failed", method, url);
            }
            status.is_server_error()
        };
        let resp = self
            .retry
            .run(|_| self.send_authorized(&method, &url, body), is_server_error)
            .await?;

        tracing::debug!(status = resp.status().as_u16(), "{} {}", method, url);
        Ok(resp)
    }

    /// One attempt: send, and on 401 refresh and resend exactly once.
    async fn send_authorized(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let (response, sent_with) = self.send(method, url, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("401 Unauthorized for {} {}, refreshing tokens", method, url);
        self.refresh_rejected(&sent_with).await?;
        let (resent, _) = self.send(method, url, body).await?;
        if resent.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthRejected(format!(
                "401 Unauthorized for {} after token refresh",
                url
            )));
        }
        Ok(resent)
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.execute(Method::GET, path, None).await?;
        read_json(check_response(resp).await?).await
    }

    /// PUT `body` to `path` and decode the JSON reply.
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let resp = self.execute(Method::PUT, path, Some(&body)).await?;
        read_json(check_response(resp).await?).await
    }

    /// Proactive refresh: advisory expiry check of the access token.
    async fn refresh_if_expired(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::Unauthenticated)?;

        let access_token = session.tokens()?.access_token.clone();
        let claims = self.validator.decode(&access_token, false).await?;
        if claims.is_expired_at(Utc::now()) {
            tracing::info!("Access token expired at {}, refreshing", claims.expiry);
            session.refresh().await?;
        }
        Ok(())
    }

    /// Reactive refresh after a 401 for a request sent with `sent_with`.
    ///
    /// Skipped if another caller already replaced that token.
    async fn refresh_rejected(&self, sent_with: &str) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(Error::Unauthenticated)?;

        if session.tokens()?.id_token != sent_with {
            tracing::debug!("Tokens already refreshed by another caller");
            return Ok(());
        }
        session.refresh().await?;
        Ok(())
    }

    /// One HTTP exchange; returns the response and the identity token used.
    async fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<(Response, String)> {
        let id_token = self.current_tokens().await?.id_token;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("authtoken", &id_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!("{} {}", method, url);
        let response = request.send().await?;
        Ok((response, id_token))
    }
}

/// Check HTTP response status code and return a typed error on failure.
pub(crate) async fn check_response(resp: Response) -> Result<Response> {
    let status = resp.status();
    let url = resp.url().to_string();
    if status.is_server_error() {
        return Err(Error::ServerUnavailable {
            status: status.as_u16(),
            url,
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::RequestRejected {
            status: status.as_u16(),
            url,
            body,
        });
    }
    Ok(resp)
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let url = resp.url().to_string();
    let text = resp.text().await?;
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };
    serde_json::from_str(text).map_err(|e| Error::InvalidResponse(format!("{}: {}", url, e)))
}
