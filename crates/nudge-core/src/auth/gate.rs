//! Single-flight access-token refresh.
//!
//! Every authorized remote call goes through [`TokenRefreshGate::authorized_request`].
//! When a call comes back 401 the gate refreshes the access token once and
//! retries the call. While that refresh is running, other callers that hit a
//! 401 fail with [`AuthError::Unauthorized`] instead of starting a second one.
//!
//! The state mutex is never held across an `.await`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{CredentialStore, TokenRefresher};
use crate::error::{AuthError, RemoteError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Ready,
    Refreshing,
}

#[derive(Debug, Default)]
struct GateState {
    access_token: Option<String>,
    refreshing: bool,
    /// Bumped whenever the access token is replaced.
    generation: u64,
}

enum Admission<'a> {
    /// Someone else already rotated the token; try again with it.
    Retry(String),
    /// A refresh is in flight.
    Busy,
    /// This caller owns the refresh.
    Refresh(RefreshGuard<'a>),
}

/// Clears the refreshing flag even if the refresh future is dropped.
struct RefreshGuard<'a> {
    gate: &'a TokenRefreshGate,
    armed: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self, token: Option<String>) {
        let mut state = self.gate.lock();
        state.access_token = token;
        state.generation += 1;
        state.refreshing = false;
        self.armed = false;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.lock().refreshing = false;
        }
    }
}

pub struct TokenRefreshGate {
    state: Mutex<GateState>,
    credentials: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenRefreshGate {
    pub fn new(credentials: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            credentials,
            refresher,
        }
    }

    /// Seed an access token obtained outside the gate (e.g. at sign-in).
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.lock().access_token = Some(token.into());
        self
    }

    pub fn phase(&self) -> GatePhase {
        if self.lock().refreshing {
            GatePhase::Refreshing
        } else {
            GatePhase::Ready
        }
    }

    pub fn has_access_token(&self) -> bool {
        self.lock().access_token.is_some()
    }

    /// Store a fresh credential pair after an interactive sign-in.
    pub fn sign_in(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        self.credentials.set(refresh_token)?;
        let mut state = self.lock();
        state.access_token = Some(access_token.to_string());
        state.generation += 1;
        info!("signed in");
        Ok(())
    }

    /// Forget both tokens.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        {
            let mut state = self.lock();
            state.access_token = None;
            state.generation += 1;
        }
        self.credentials.delete()
    }

    /// Run `request` with the current bearer token, refreshing once on 401.
    ///
    /// `request` may be called twice: once with the current token and once
    /// after a refresh. A second 401 is reported as [`AuthError::Unauthorized`].
    pub async fn authorized_request<T, F, Fut>(&self, request: F) -> Result<T, RemoteError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let (token, seen) = {
            let state = self.lock();
            (state.access_token.clone(), state.generation)
        };

        if let Some(token) = token {
            match request(token).await {
                Err(TransportError::Unauthorized) => {
                    debug!("request unauthorized; recovering access token")
                }
                other => return other.map_err(RemoteError::from),
            }
        }

        let token = self.recover(seen).await?;
        match request(token).await {
            Err(TransportError::Unauthorized) => {
                warn!("request still unauthorized after token recovery");
                Err(AuthError::Unauthorized.into())
            }
            other => other.map_err(RemoteError::from),
        }
    }

    async fn recover(&self, seen: u64) -> Result<String, AuthError> {
        let guard = match self.admit(seen) {
            Admission::Retry(token) => return Ok(token),
            Admission::Busy => {
                debug!("refresh already in flight; failing request");
                return Err(AuthError::Unauthorized);
            }
            Admission::Refresh(guard) => guard,
        };

        match self.refresh_once().await {
            Ok(token) => {
                info!("access token refreshed");
                guard.finish(Some(token.clone()));
                Ok(token)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed; clearing credentials");
                guard.finish(None);
                if let Err(e) = self.credentials.delete() {
                    warn!(error = %e, "failed to delete refresh credential");
                }
                Err(AuthError::Unauthorized)
            }
        }
    }

    fn admit(&self, seen: u64) -> Admission<'_> {
        let mut state = self.lock();
        if state.refreshing {
            return Admission::Busy;
        }
        if state.generation != seen {
            if let Some(token) = &state.access_token {
                return Admission::Retry(token.clone());
            }
        }
        state.refreshing = true;
        Admission::Refresh(RefreshGuard {
            gate: self,
            armed: true,
        })
    }

    async fn refresh_once(&self) -> Result<String, AuthError> {
        let refresh_token = self
            .credentials
            .get()?
            .ok_or(AuthError::MissingCredential)?;
        let grant = self.refresher.refresh(&refresh_token).await?;
        if let Some(rotated) = grant.refresh_token.as_deref() {
            if rotated != refresh_token {
                if let Err(e) = self.credentials.set(rotated) {
                    warn!(error = %e, "failed to store rotated refresh credential");
                }
            }
        }
        Ok(grant.access_token)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
