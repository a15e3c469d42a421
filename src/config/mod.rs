//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::{ClientOptions, RetryPolicy, API_ROOT};
use crate::api::retry::secs;
use crate::auth::{IdentityProvider, StoredSession, TokenSink, TokenValidator};
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the Emporia REST API
    pub api_root: String,
    /// Connect timeout for a single attempt, in seconds
    pub connect_timeout_secs: f64,
    /// Read timeout for a single attempt, in seconds
    pub read_timeout_secs: f64,
    /// Attempts per call on server errors (at least 1)
    pub max_retry_attempts: u32,
    /// First backoff delay in seconds (at least 0.5)
    pub initial_retry_delay_secs: f64,
    /// Backoff ceiling in seconds
    pub max_retry_delay_secs: f64,
    /// Re-fetch the signing keys once when a token names an unknown key id
    pub refetch_jwks_on_unknown_key: bool,
    /// Tokens and username from the last login
    pub session: Option<StoredSession>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_root: API_ROOT.to_string(),
            connect_timeout_secs: 6.03,
            read_timeout_secs: 10.03,
            max_retry_attempts: 5,
            initial_retry_delay_secs: 0.5,
            max_retry_delay_secs: 30.0,
            refetch_jwks_on_unknown_key: false,
            session: None,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "emvue", "emvue")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs_f64(
            self.max_retry_attempts,
            self.initial_retry_delay_secs,
            self.max_retry_delay_secs,
        )
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_root: self.api_root.clone(),
            connect_timeout: secs(self.connect_timeout_secs),
            read_timeout: secs(self.read_timeout_secs),
            retry: self.retry_policy(),
        }
    }

    pub fn token_validator(&self, provider: Arc<dyn IdentityProvider>) -> TokenValidator {
        TokenValidator::new(provider).refetch_on_unknown_key(self.refetch_jwks_on_unknown_key)
    }

    /// Stored session, if it holds a complete token triple.
    pub fn stored_session(&self) -> Option<&StoredSession> {
        self.session.as_ref().filter(|s| s.tokens.is_complete())
    }

    pub fn clear_session(&mut self) {
        self.session = None;
    }
}

/// Writes every token change back into the config file.
#[derive(Debug, Clone)]
pub struct FileTokenSink {
    path: PathBuf,
}

impl FileTokenSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenSink for FileTokenSink {
    fn persist(&self, session: &StoredSession) -> Result<()> {
        let mut config = Config::load_from(&self.path)?;
        config.session = Some(session.clone());
        config.save_to(&self.path)?;
        tracing::debug!("Session saved to {}", self.path.display());
        Ok(())
    }
}
