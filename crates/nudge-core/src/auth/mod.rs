//! Credentials for the remote store.
//!
//! The long-lived refresh credential lives in a [`CredentialStore`]; the
//! short-lived access token only ever lives in memory inside the
//! [`TokenRefreshGate`].

pub mod gate;
pub mod refresh;

pub use gate::{GatePhase, TokenRefreshGate};
pub use refresh::{OAuthRefresher, TokenGrant, TokenRefresher};

use std::sync::Mutex;

use crate::error::AuthError;

/// Key under which the refresh credential is stored.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Secure storage for the signed-in user's refresh credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, AuthError>;
    fn set(&self, value: &str) -> Result<(), AuthError>;
    /// Removing a missing credential is not an error.
    fn delete(&self) -> Result<(), AuthError>;
}

/// OS keyring backed store.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    key: String,
}

impl KeyringCredentialStore {
    pub const SERVICE: &'static str = "nudge";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            key: REFRESH_TOKEN_KEY.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, &self.key).map_err(credential_error)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Result<Option<String>, AuthError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(credential_error(e)),
        }
    }

    fn set(&self, value: &str) -> Result<(), AuthError> {
        self.entry()?.set_password(value).map_err(credential_error)
    }

    fn delete(&self) -> Result<(), AuthError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(credential_error(e)),
        }
    }
}

fn credential_error(err: keyring::Error) -> AuthError {
    AuthError::Credential(err.to_string())
}

/// Process-memory store for tests and hosts with their own secure storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    value: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(token.into())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<String>, AuthError> {
        Ok(self.lock().clone())
    }

    fn set(&self, value: &str) -> Result<(), AuthError> {
        *self.lock() = Some(value.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), AuthError> {
        *self.lock() = None;
        Ok(())
    }
}
