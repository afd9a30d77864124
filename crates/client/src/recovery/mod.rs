//! Password recovery: turning a one-time emailed link into a session, then a
//! new password.
//!
//! ```text
//! Idle --capture--> TokenCaptured --restore--> Restoring --+--> Ready    --submit--> Completed
//!                                                          +--> Degraded --submit--> Completed
//!                                                          +--> Failed
//! ```
//!
//! Tokens are taken out of the [`TokenSlot`] before any attempt to establish
//! the session, so a link is consumed at most once whatever the outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DEFAULT_RECOVERY_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::password;
use crate::remote::RemoteClient;

mod link;
mod slot;

pub use link::{rewrite_to_route, sign_in_tokens, Location, MarkerSource, RecoveryLink, RecoveryTokens};
pub use slot::TokenSlot;

/// In-app routes the recovery flow sends the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    UpdatePassword,
    RequestRecovery,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::UpdatePassword => "/update-password",
            Route::RequestRecovery => "/forgot-password",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No captured token and no existing session.
    NoSession,
    /// The backend refused the captured tokens.
    Rejected(String),
    /// The establishment task died before answering.
    Aborted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoSession => f.write_str("the recovery link is invalid or was already used"),
            FailureReason::Rejected(message) => write!(f, "the recovery link was rejected: {}", message),
            FailureReason::Aborted => f.write_str("session restoration was aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    TokenCaptured,
    Restoring,
    Ready,
    /// Session establishment timed out; it may still have succeeded remotely.
    Degraded,
    Failed(FailureReason),
    Completed,
}

impl RecoveryState {
    /// Whether the password form may be shown.
    pub fn accepts_password(&self) -> bool {
        matches!(self, RecoveryState::Ready | RecoveryState::Degraded)
    }
}

pub struct RecoveryHandler {
    remote: Arc<dyn RemoteClient>,
    slot: Arc<TokenSlot>,
    state: RecoveryState,
    timeout: Duration,
}

impl RecoveryHandler {
    pub fn new(remote: Arc<dyn RemoteClient>, slot: Arc<TokenSlot>) -> Self {
        Self {
            remote,
            slot,
            state: RecoveryState::Idle,
            timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    fn transition(&mut self, next: RecoveryState) {
        tracing::debug!(from = ?self.state, to = ?next, "Recovery state change");
        self.state = next;
    }

    /// Looks for a recovery marker in `location` at bootstrap.
    ///
    /// Whenever a marker is present the address is rewritten to the
    /// password-update route, so token material never stays visible. Returns
    /// true when fresh tokens were captured.
    pub fn capture(&mut self, location: &mut Location) -> bool {
        let Some(link) = RecoveryLink::parse(location.href()) else {
            return false;
        };
        location.replace(rewrite_to_route(location.href(), Route::UpdatePassword.path()));

        if !self.slot.put(link.tokens) {
            tracing::warn!("Recovery link was already used in this session, ignoring it");
            return false;
        }
        tracing::info!(source = ?link.source, "Captured recovery tokens");
        self.transition(RecoveryState::TokenCaptured);
        true
    }

    /// Establishes the session for the password-update view.
    ///
    /// An existing session wins. Otherwise the captured tokens are presented
    /// once, racing the configured timeout; a late answer is discarded.
    pub async fn restore(&mut self) -> &RecoveryState {
        self.transition(RecoveryState::Restoring);
        let tokens = self.slot.take();

        match self.remote.get_session().await {
            Ok(Some(_)) => {
                tracing::info!("Session already present, skipping token exchange");
                self.transition(RecoveryState::Ready);
                return &self.state;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Could not check for an existing session"),
        }

        let Some(tokens) = tokens else {
            tracing::warn!("No recovery token available");
            self.transition(RecoveryState::Failed(FailureReason::NoSession));
            return &self.state;
        };

        let remote = Arc::clone(&self.remote);
        let exchange = tokio::spawn(async move {
            remote
                .set_session(&tokens.access_token, tokens.refresh_token.as_deref())
                .await
        });

        let next = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Ok(session))) => {
                tracing::info!(user_id = %session.user.id, "Recovery session established");
                RecoveryState::Ready
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Recovery tokens rejected");
                RecoveryState::Failed(FailureReason::Rejected(e.to_string()))
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Session restoration task failed");
                RecoveryState::Failed(FailureReason::Aborted)
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Session restoration timed out, continuing degraded");
                RecoveryState::Degraded
            }
        };
        self.transition(next);
        &self.state
    }

    /// Sets the new password and signs out. Returns the route to continue to.
    ///
    /// Local validation runs first and makes no remote call on failure. A
    /// failed update leaves the handler ready for another attempt.
    pub async fn submit(&mut self, password: &str, confirmation: &str) -> Result<Route> {
        match &self.state {
            RecoveryState::Ready | RecoveryState::Degraded => {}
            RecoveryState::Failed(reason) => return Err(AppError::RecoveryUnavailable(reason.to_string())),
            RecoveryState::Completed => {
                return Err(AppError::BadRequest("password was already updated".to_string()))
            }
            _ => return Err(AppError::RecoveryUnavailable("session is not restored yet".to_string())),
        }

        password::validate(password, confirmation)?;

        self.remote.update_password(password).await?;
        tracing::info!("Password updated, signing out");

        if let Err(e) = self.remote.sign_out().await {
            tracing::warn!(error = %e, "Sign-out after password update failed");
        }
        self.transition(RecoveryState::Completed);
        Ok(Route::Login)
    }

    /// The only route available from the current state.
    pub fn route(&self) -> Route {
        match self.state {
            RecoveryState::Failed(_) => Route::RequestRecovery,
            RecoveryState::Completed => Route::Login,
            _ => Route::UpdatePassword,
        }
    }
}

/// Sends a recovery email whose link leads back to `redirect_to`.
pub async fn request_reset(remote: &dyn RemoteClient, email: &str, redirect_to: &str) -> Result<()> {
    password::validate_email(email)?;
    remote.send_password_reset_email(email.trim(), redirect_to).await?;
    tracing::info!("Password reset email requested");
    Ok(())
}
