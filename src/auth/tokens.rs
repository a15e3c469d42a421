//! Token storage and management

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The token triple issued by the identity provider.
///
/// Either all of access/id/refresh are present or the set is empty. The API
/// authenticates with the identity token, not the access token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        id_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
        }
    }

    /// All three tokens are present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.id_token.is_empty() && !self.refresh_token.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() && self.id_token.is_empty() && self.refresh_token.is_empty()
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("complete", &self.is_complete())
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// What gets written to durable storage after every token change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(flatten)]
    pub tokens: TokenSet,
    pub username: Option<String>,
}

/// Persistence callback for token changes (e.g. a file write).
pub trait TokenSink: Send + Sync {
    fn persist(&self, session: &StoredSession) -> anyhow::Result<()>;
}

impl<F> TokenSink for F
where
    F: Fn(&StoredSession) -> anyhow::Result<()> + Send + Sync,
{
    fn persist(&self, session: &StoredSession) -> anyhow::Result<()> {
        self(session)
    }
}

/// Holder of the current tokens plus the notification point for persistence.
pub struct CredentialStore {
    tokens: TokenSet,
    username: Option<String>,
    sink: Option<Box<dyn TokenSink>>,
}

impl CredentialStore {
    pub fn new(sink: Option<Box<dyn TokenSink>>) -> Self {
        Self {
            tokens: TokenSet::default(),
            username: None,
            sink,
        }
    }

    pub fn get(&self) -> &TokenSet {
        &self.tokens
    }

    /// Replace the whole token set and notify the sink exactly once.
    pub fn set(&mut self, tokens: TokenSet) -> Result<()> {
        self.tokens = tokens;
        if let Some(sink) = &self.sink {
            let stored = StoredSession {
                tokens: self.tokens.clone(),
                username: self.username.clone(),
            };
            sink.persist(&stored)
                .map_err(|e| Error::Persist(format!("{:#}", e)))?;
        }
        Ok(())
    }

    /// Adopt tokens without notifying the sink (they came from storage).
    pub fn adopt(&mut self, tokens: TokenSet) {
        self.tokens = tokens;
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.username = username.map(|u| u.to_lowercase());
    }
}
