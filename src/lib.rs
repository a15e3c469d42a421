//! Emporia energy API client
//!
//! Session management for the Emporia cloud API: Cognito-backed login and
//! token renewal, a resilient request executor, and best-effort merging of
//! partial multi-device usage replies.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

pub use api::{ClientOptions, RetryPolicy, UsageSnapshot, VueClient};
pub use auth::{Credentials, IdentityProvider, Session, TokenSet};
pub use error::{Error, Result};
