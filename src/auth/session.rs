//! Session establishment and renewal
//!
//! A session starts either from a username/password exchange or from a
//! stored token triple. The password is held only until the first exchange;
//! later renewals use the refresh token alone.

use std::sync::Arc;

use super::provider::IdentityProvider;
use super::tokens::{CredentialStore, TokenSet, TokenSink};
use crate::error::{Error, Result};

/// Lifecycle of a [`Session`].
///
/// Authenticating and refreshing happen inside `&mut self` calls, so no other
/// operation ever observes a half-refreshed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// The identity provider refused us; only new credentials help.
    Rejected,
}

/// Inputs for [`Session::authenticate`]. Complete tokens win over a password.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub tokens: Option<TokenSet>,
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            tokens: None,
        }
    }

    pub fn tokens(tokens: TokenSet, username: Option<String>) -> Self {
        Self {
            username,
            password: None,
            tokens: Some(tokens),
        }
    }
}

pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    store: CredentialStore,
    password: Option<String>,
    state: SessionState,
}

impl Session {
    /// Establish a session.
    ///
    /// Stored tokens are adopted without contacting the identity provider.
    /// Otherwise a username and password are required and exchanged right away.
    pub async fn authenticate(
        provider: Arc<dyn IdentityProvider>,
        credentials: Credentials,
        sink: Option<Box<dyn TokenSink>>,
    ) -> Result<Self> {
        let mut store = CredentialStore::new(sink);
        store.set_username(credentials.username);

        let mut session = Self {
            provider,
            store,
            password: None,
            state: SessionState::Unauthenticated,
        };

        match (credentials.tokens, credentials.password) {
            (Some(tokens), _) if tokens.is_complete() => {
                tracing::debug!("Adopting stored tokens");
                session.store.adopt(tokens);
                session.state = SessionState::Authenticated;
            }
            (_, Some(password)) if session.store.username().is_some() => {
                session.password = Some(password);
                session.refresh().await?;
            }
            _ => return Err(Error::MissingCredentials),
        }

        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current tokens; fails unless the session is authenticated.
    pub fn tokens(&self) -> Result<&TokenSet> {
        match self.state {
            SessionState::Authenticated => Ok(self.store.get()),
            SessionState::Unauthenticated => Err(Error::Unauthenticated),
            SessionState::Rejected => Err(rejected()),
        }
    }

    /// Renew the token set and persist it.
    ///
    /// Uses the held password for a full exchange if there is one, the
    /// refresh token otherwise. Identity-provider rejections are terminal and
    /// move the session to [`SessionState::Rejected`].
    pub async fn refresh(&mut self) -> Result<&TokenSet> {
        let result = match (&self.password, self.state) {
            (_, SessionState::Rejected) => return Err(rejected()),
            (Some(password), _) => {
                let username = self.store.username().ok_or(Error::MissingCredentials)?;
                self.provider.password_login(username, password).await
            }
            (None, SessionState::Authenticated) => self.provider.refresh(self.store.get()).await,
            (None, SessionState::Unauthenticated) => return Err(Error::Unauthenticated),
        };

        let tokens = match result {
            Ok(tokens) => tokens,
            Err(e @ Error::AuthRejected(_)) => {
                tracing::warn!("Identity provider rejected the session: {}", e);
                self.password = None;
                self.state = SessionState::Rejected;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if !tokens.is_complete() {
            return Err(Error::InvalidResponse(
                "identity provider returned an incomplete token set".to_string(),
            ));
        }

        self.password = None;
        self.state = SessionState::Authenticated;
        self.store.set(tokens)?;
        tracing::info!("Session tokens renewed");
        Ok(self.store.get())
    }

    /// Email of the authenticated identity, as reported by its profile.
    ///
    /// The result becomes the username persisted alongside the tokens.
    pub async fn username(&mut self) -> Result<String> {
        let profile = self.provider.get_profile(self.tokens()?).await?;
        let username = profile.email.unwrap_or(profile.username).to_lowercase();

        if self.store.username() != Some(username.as_str()) {
            self.store.set_username(Some(username.clone()));
            let tokens = self.store.get().clone();
            self.store.set(tokens)?;
        }
        Ok(username)
    }

    pub fn known_username(&self) -> Option<&str> {
        self.store.username()
    }
}

fn rejected() -> Error {
    Error::AuthRejected("session was rejected; log in again with new credentials".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_support::{token_set, FakeProvider};
    use crate::auth::tokens::StoredSession;
    use std::sync::Mutex;

    fn recording_sink() -> (Box<dyn TokenSink>, Arc<Mutex<Vec<StoredSession>>>) {
        let seen: Arc<Mutex<Vec<StoredSession>>> = Arc::default();
        let seen_sink = seen.clone();
        let sink = move |s: &StoredSession| -> anyhow::Result<()> {
            seen_sink.lock().unwrap().push(s.clone());
            Ok(())
        };
        (Box::new(sink), seen)
    }

    #[tokio::test]
    async fn test_tokens_adopted_without_provider() {
        let provider = Arc::new(FakeProvider::default());
        let (sink, seen) = recording_sink();

        let tokens = token_set("stored", 3600);
        let session = Session::authenticate(
            provider.clone(),
            Credentials::tokens(tokens.clone(), None),
            Some(sink),
        )
        .await
        .unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.tokens().unwrap(), &tokens);
        assert_eq!(provider.logins(), 0);
        assert_eq!(provider.refreshes(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_password_used_once() {
        let provider = Arc::new(FakeProvider::default());
        let (sink, seen) = recording_sink();

        let mut session = Session::authenticate(
            provider.clone(),
            Credentials::password("User@Example.com", "correct"),
            Some(sink),
        )
        .await
        .unwrap();
        assert_eq!(provider.logins(), 1);
        assert_eq!(session.tokens().unwrap().id_token, "id-login1");

        session.refresh().await.unwrap();
        assert_eq!(provider.logins(), 1);
        assert_eq!(provider.refreshes(), 1);
        assert_eq!(session.tokens().unwrap().id_token, "id-refresh1");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].username.as_deref(), Some("user@example.com"));
        assert_eq!(seen[1].tokens.id_token, "id-refresh1");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let provider = Arc::new(FakeProvider::default());

        let cases = [
            Credentials::default(),
            Credentials {
                username: Some("user".to_string()),
                ..Credentials::default()
            },
            Credentials {
                password: Some("correct".to_string()),
                ..Credentials::default()
            },
            Credentials::tokens(TokenSet::new("access", "", "refresh", "Bearer"), None),
        ];
        for credentials in cases {
            let err = Session::authenticate(provider.clone(), credentials, None)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::MissingCredentials));
        }
        assert_eq!(provider.logins(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_tokens_fall_back_to_password() {
        let provider = Arc::new(FakeProvider::default());
        let credentials = Credentials {
            username: Some("user".to_string()),
            password: Some("correct".to_string()),
            tokens: Some(TokenSet::new("access", "", "", "")),
        };

        let session = Session::authenticate(provider.clone(), credentials, None)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(provider.logins(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let provider = Arc::new(FakeProvider::default());
        let err = Session::authenticate(
            provider.clone(),
            Credentials::password("user", "wrong"),
            None,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::AuthRejected(_)));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_terminal() {
        let provider = Arc::new(FakeProvider {
            reject_refresh: true,
            ..FakeProvider::default()
        });
        let mut session = Session::authenticate(
            provider.clone(),
            Credentials::tokens(token_set("stored", 3600), None),
            None,
        )
        .await
        .unwrap();

        assert!(matches!(
            session.refresh().await.unwrap_err(),
            Error::AuthRejected(_)
        ));
        assert_eq!(session.state(), SessionState::Rejected);
        assert!(matches!(session.tokens().unwrap_err(), Error::AuthRejected(_)));
        assert!(matches!(
            session.refresh().await.unwrap_err(),
            Error::AuthRejected(_)
        ));
    }

    #[tokio::test]
    async fn test_username_from_profile_is_persisted() {
        let provider = Arc::new(FakeProvider::default());
        let (sink, seen) = recording_sink();
        let mut session = Session::authenticate(
            provider,
            Credentials::tokens(token_set("stored", 3600), None),
            Some(sink),
        )
        .await
        .unwrap();

        assert_eq!(session.username().await.unwrap(), "user@example.com");
        assert_eq!(session.known_username(), Some("user@example.com"));
        // Second lookup does not rewrite storage.
        session.username().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].username.as_deref(), Some("user@example.com"));
    }
}
