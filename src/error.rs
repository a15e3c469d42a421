//! Error types for the session and request pipeline

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that cross the client boundary.
///
/// Retryable conditions are resolved inside the pipeline; what reaches the
/// caller is either terminal or the result of an exhausted retry budget.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither a username/password pair nor a complete token set was supplied.
    #[error("no credentials or stored tokens available; log in with a username and password")]
    MissingCredentials,

    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation needing a session ran before one was established.
    #[error("not authenticated")]
    Unauthenticated,

    /// The identity provider refused the password or refresh token, or the
    /// API kept answering 401 after a refresh.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("server unavailable (HTTP {status}) for {url}")]
    ServerUnavailable { status: u16, url: String },

    #[error("request rejected (HTTP {status}) for {url}: {body}")]
    RequestRejected {
        status: u16,
        url: String,
        body: String,
    },

    /// The token could not be decoded against the published signing keys.
    #[error("token decode failed: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to persist session: {0}")]
    Persist(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether the failure came from an unavailable server or network rather
    /// than from a decision made by the server or identity provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ServerUnavailable { .. } | Error::Transport(_))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
