//! External-collaborator seams consumed by the channel manager.
//!
//! The manager never acquires tokens itself; it asks a [`CredentialProvider`]
//! for the current auth token and user id on every activation attempt.

use std::{
    env,
    sync::{Arc, RwLock},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential '{0}' is not available")]
    Missing(String),
    #[error("credential source unavailable: {0}")]
    Unavailable(String),
}

/// Supplier of the identity inputs required to open a conversation channel.
///
/// Both lookups run on every activation, so rotated tokens are picked up by
/// the next connection attempt without restarting the manager.
pub trait CredentialProvider: Send + Sync {
    fn auth_token(&self) -> Result<String, CredentialError>;

    fn user_id(&self) -> Result<String, CredentialError>;
}

/// Credential pair held by [`InMemoryCredentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_token: String,
    pub user_id: String,
}

/// Mutable in-memory provider, useful for tests and embedding hosts that
/// push refreshed tokens into the channel layer.
#[derive(Clone, Default)]
pub struct InMemoryCredentials {
    current: Arc<RwLock<Option<Credentials>>>,
}

impl InMemoryCredentials {
    pub fn new(auth_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let provider = Self::default();
        provider.set(auth_token, user_id);
        provider
    }

    /// Replace the current credential pair.
    pub fn set(&self, auth_token: impl Into<String>, user_id: impl Into<String>) {
        let mut guard = self.current.write().expect("credential lock poisoned");
        *guard = Some(Credentials {
            auth_token: auth_token.into(),
            user_id: user_id.into(),
        });
    }

    /// Drop the current credential pair; subsequent lookups fail.
    pub fn clear(&self) {
        let mut guard = self.current.write().expect("credential lock poisoned");
        *guard = None;
    }

    fn read(&self, field: &str) -> Result<Credentials, CredentialError> {
        let guard = self
            .current
            .read()
            .map_err(|_| CredentialError::Unavailable("poisoned lock".to_owned()))?;
        guard
            .clone()
            .ok_or_else(|| CredentialError::Missing(field.to_owned()))
    }
}

impl CredentialProvider for InMemoryCredentials {
    fn auth_token(&self) -> Result<String, CredentialError> {
        self.read("auth_token").map(|creds| creds.auth_token)
    }

    fn user_id(&self) -> Result<String, CredentialError> {
        self.read("user_id").map(|creds| creds.user_id)
    }
}

/// Provider backed by process environment variables.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    token_var: String,
    user_id_var: String,
}

impl EnvCredentials {
    pub fn new(token_var: impl Into<String>, user_id_var: impl Into<String>) -> Self {
        Self {
            token_var: token_var.into(),
            user_id_var: user_id_var.into(),
        }
    }

    fn read(&self, var: &str) -> Result<String, CredentialError> {
        env::var(var)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CredentialError::Missing(var.to_owned()))
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new("CHATWIRE_TOKEN", "CHATWIRE_USER_ID")
    }
}

impl CredentialProvider for EnvCredentials {
    fn auth_token(&self) -> Result<String, CredentialError> {
        self.read(&self.token_var)
    }

    fn user_id(&self) -> Result<String, CredentialError> {
        self.read(&self.user_id_var)
    }
}
