//! Session lifecycle: restore, acquire, invalidate and tear down login cookies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PanError, Result};
use crate::models::{Cookies, Session};

/// Cookies without which the backend treats a request as anonymous.
pub const REQUIRED_COOKIES: &[&str] = &["__pus", "__puus"];

/// Whether `cookies` carries every required login cookie.
pub fn has_required_cookies(cookies: &Cookies) -> bool {
    REQUIRED_COOKIES
        .iter()
        .all(|name| cookies.get(*name).is_some_and(|v| !v.is_empty()))
}

/// Yields fresh login cookies.
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    /// Show a QR code and wait for it to be confirmed. Fails with `AcquireTimeout`.
    async fn acquire_via_qr(&self, timeout: Duration) -> Result<Cookies>;

    /// Interactive fallback. Fails with `AcquireAbandoned`.
    async fn acquire_manually(&self) -> Result<Cookies>;
}

/// Persisted cookies as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredentials {
    pub cookies: Cookies,
    pub saved_at: i64,
    pub expires_at: Option<i64>,
}

/// Local persistence for login cookies. `save` must be atomic.
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when nothing usable (missing or expired) is stored.
    fn load(&self) -> Result<Option<StoredCredentials>>;
    fn save(&self, cookies: &Cookies) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Lifecycle stage reported by [`SessionManager::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Valid,
    Invalidated,
    Failed,
    LoggedOut,
}

#[derive(Debug)]
enum SessionState {
    Unauthenticated,
    Valid(Session),
    /// The backend rejected this session (`valid == false`); restoring its cookies is pointless.
    Invalidated { rejected: Session },
    /// The last acquisition failed; reused until an explicit login or reset.
    Failed { message: String },
    LoggedOut,
}

/// Owns the process' authentication state.
///
/// Concurrent `ensure_session` calls are serialized on one lock, so at most one restore or
/// acquisition is in flight and every waiter sees its result.
pub struct SessionManager {
    acquirer: Arc<dyn CredentialAcquirer>,
    store: Arc<dyn CredentialStore>,
    qr_timeout: Duration,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        acquirer: Arc<dyn CredentialAcquirer>,
        store: Arc<dyn CredentialStore>,
        qr_timeout: Duration,
    ) -> Self {
        Self {
            acquirer,
            store,
            qr_timeout,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    /// Return a valid session: cached, restored from the store, or freshly acquired.
    pub async fn ensure_session(&self) -> Result<Session> {
        let mut state = self.state.lock().await;

        let rejected = match &*state {
            SessionState::Valid(session) => return Ok(session.clone()),
            SessionState::LoggedOut => {
                return Err(PanError::Auth("logged out; log in again to continue".into()))
            }
            SessionState::Failed { message } => return Err(PanError::Auth(message.clone())),
            SessionState::Invalidated { rejected } => Some(rejected.cookies.clone()),
            SessionState::Unauthenticated => None,
        };

        if let Some(session) = self.restore(rejected.as_ref()) {
            *state = SessionState::Valid(session.clone());
            return Ok(session);
        }

        match self.acquire().await {
            Ok(session) => {
                *state = SessionState::Valid(session.clone());
                Ok(session)
            }
            Err(err) => {
                let message = format!("login failed: {}", err);
                warn!(error = %err, "session acquisition failed");
                *state = SessionState::Failed {
                    message: message.clone(),
                };
                Err(PanError::Auth(message))
            }
        }
    }

    /// Mark `session` as rejected by the backend. A newer session is left alone.
    pub async fn invalidate(&self, session: &Session) {
        let mut state = self.state.lock().await;
        if let SessionState::Valid(current) = &*state {
            if current.cookies == session.cookies {
                info!("session rejected by backend, will re-authenticate on next call");
                let mut rejected = current.clone();
                rejected.valid = false;
                *state = SessionState::Invalidated { rejected };
            }
        }
    }

    /// Explicit login, clearing any remembered failure. With `force` the store is skipped.
    pub async fn login(&self, force: bool) -> Result<Session> {
        let mut state = self.state.lock().await;
        if !force {
            if let SessionState::Valid(session) = &*state {
                return Ok(session.clone());
            }
            if let Some(session) = self.restore(None) {
                *state = SessionState::Valid(session.clone());
                return Ok(session);
            }
        }

        match self.acquire().await {
            Ok(session) => {
                *state = SessionState::Valid(session.clone());
                Ok(session)
            }
            Err(err) => {
                *state = SessionState::Unauthenticated;
                Err(PanError::Auth(format!("login failed: {}", err)))
            }
        }
    }

    /// Forget a remembered acquisition failure or logout so the next call tries again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if matches!(
            *state,
            SessionState::Failed { .. } | SessionState::LoggedOut
        ) {
            *state = SessionState::Unauthenticated;
        }
    }

    /// Clear cached and persisted credentials.
    pub async fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = SessionState::LoggedOut;
        self.store.clear()?;
        info!("cleared login state");
        Ok(())
    }

    /// The session last handed out, if any. A rejected one comes back with `valid == false`.
    pub async fn current(&self) -> Option<Session> {
        match &*self.state.lock().await {
            SessionState::Valid(session) => Some(session.clone()),
            SessionState::Invalidated { rejected } => Some(rejected.clone()),
            _ => None,
        }
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.lock().await {
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionState::Valid(_) => SessionStatus::Valid,
            SessionState::Invalidated { .. } => SessionStatus::Invalidated,
            SessionState::Failed { .. } => SessionStatus::Failed,
            SessionState::LoggedOut => SessionStatus::LoggedOut,
        }
    }

    fn restore(&self, rejected: Option<&Cookies>) -> Option<Session> {
        let stored = match self.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "could not read stored credentials");
                return None;
            }
        };

        if !has_required_cookies(&stored.cookies) {
            warn!("stored credentials are missing required cookies");
            return None;
        }
        if rejected == Some(&stored.cookies) {
            debug!("stored credentials were already rejected, skipping restore");
            return None;
        }

        debug!(saved_at = stored.saved_at, "restored session from store");
        Some(Session::new(stored.cookies))
    }

    async fn acquire(&self) -> Result<Session> {
        let cookies = match self.acquirer.acquire_via_qr(self.qr_timeout).await {
            Ok(cookies) => cookies,
            Err(err) => {
                warn!(error = %err, "QR login failed, falling back to manual login");
                self.acquirer.acquire_manually().await?
            }
        };

        if !has_required_cookies(&cookies) {
            return Err(PanError::Auth(format!(
                "acquired cookies are missing one of {:?}",
                REQUIRED_COOKIES
            )));
        }

        if let Err(err) = self.store.save(&cookies) {
            warn!(error = %err, "could not persist credentials");
        }
        info!("login succeeded");
        Ok(Session::new(cookies))
    }
}
