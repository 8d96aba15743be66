//! Login state shared by every remote call of a run.

use std::sync::Arc;

use emdash_protocol::ContextId;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{FailureKind, SyncError};
use crate::remote::SessionProvider;
use crate::retry::{RetryPolicy, sleep_or_cancel};

/// Username and password for the remote database.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Holds the current context id and knows how to obtain a new one.
pub struct Session {
    provider: Arc<dyn SessionProvider>,
    credentials: Credentials,
    context: RwLock<Option<ContextId>>,
}

impl Session {
    pub fn new(provider: Arc<dyn SessionProvider>, credentials: Credentials) -> Self {
        Self {
            provider,
            credentials,
            context: RwLock::new(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Logs in and stores the new context id.
    pub async fn login(&self) -> Result<ContextId, SyncError> {
        let mut guard = self.context.write().await;
        let ctx = self
            .provider
            .login(&self.credentials.username, &self.credentials.password)
            .await?;
        info!(user = %self.credentials.username, "logged in");
        *guard = Some(ctx.clone());
        Ok(ctx)
    }

    /// Returns the last context id obtained by [`login`](Self::login).
    pub async fn current_context(&self) -> Result<ContextId, SyncError> {
        self.context
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Config("not logged in".into()))
    }

    /// Replaces `stale` with a fresh context id.
    ///
    /// When several tasks see the same expired context, only the first one
    /// logs in; the others pick up its result.
    pub async fn relogin(&self, stale: &ContextId) -> Result<ContextId, SyncError> {
        let mut guard = self.context.write().await;
        if let Some(current) = guard.as_ref()
            && current != stale
        {
            return Ok(current.clone());
        }
        let ctx = self
            .provider
            .login(&self.credentials.username, &self.credentials.password)
            .await?;
        *guard = Some(ctx.clone());
        Ok(ctx)
    }

    /// Logs in, retrying every failure per `policy` until it succeeds or
    /// `cancel` fires.
    pub async fn login_until_success(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ContextId, SyncError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::cancelled());
            }
            attempt = attempt.saturating_add(1);
            match self.login().await {
                Ok(ctx) => return Ok(ctx),
                Err(e) if e.kind() == Some(FailureKind::Cancelled) => return Err(e),
                Err(e) if !policy.allows_attempt(attempt + 1) => return Err(e),
                Err(e) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "login failed, retrying"
                    );
                    sleep_or_cancel(delay, cancel).await?;
                }
            }
        }
    }
}
