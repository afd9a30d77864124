//! Remote data client: authentication plus row CRUD against the hosted backend.
//!
//! The application talks to the backend only through [`RemoteClient`]. Three
//! implementations exist: [`HttpClient`] for the real service, [`StubClient`]
//! when credentials are missing, and [`MemoryBackend`] for tests and offline use.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::rows::decode_rows;
use shared::{AuthEvent, AuthUser, Session};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::Result;

mod http;
mod memory;
mod stub;

pub use http::HttpClient;
pub use memory::{FailOn, MemoryBackend};
pub use stub::StubClient;

/// Capacity of the auth-event broadcast channel.
pub(crate) const AUTH_EVENT_CAPACITY: usize = 32;

/// Equality filter on a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A select against one collection, optionally embedding related rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }
}

/// Result of a sign-up. The backend may withhold the session until the email
/// address is confirmed.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<Session>,
}

/// Live subscription to auth-state changes. Dropping it unsubscribes.
pub struct AuthSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<AuthEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event. Returns `None` once the client is gone.
    /// Lagged events are skipped; subscribers only care about the latest state.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth subscriber lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Everything the application needs from the backend.
///
/// Every call may fail with a transport or validation error. Writes must be
/// surfaced to the caller; reads may be degraded by the caller.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    async fn get_session(&self) -> Result<Option<Session>>;

    /// Establishes a session from raw tokens, e.g. those of a recovery link.
    async fn set_session(&self, access_token: &str, refresh_token: Option<&str>) -> Result<Session>;

    async fn update_password(&self, password: &str) -> Result<AuthUser>;

    async fn send_password_reset_email(&self, email: &str, redirect_to: &str) -> Result<()>;

    /// Emails a one-time sign-in link leading back to `redirect_to`.
    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<()>;

    fn subscribe(&self) -> AuthSubscription;

    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Inserts one row and returns it as stored, with its assigned id.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<()>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()>;
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Selects and decodes rows. Rows that do not decode are logged and skipped.
pub async fn select_as<T: DeserializeOwned>(
    remote: &dyn RemoteClient,
    query: &Query,
) -> Result<Vec<T>> {
    let rows = remote.select(query).await?;
    Ok(decode_rows(rows))
}

pub async fn insert_as<P: Serialize, T: DeserializeOwned>(
    remote: &dyn RemoteClient,
    table: &str,
    payload: &P,
) -> Result<T> {
    let row = remote.insert(table, serde_json::to_value(payload)?).await?;
    Ok(serde_json::from_value(row)?)
}

pub async fn update_by_id<P: Serialize>(
    remote: &dyn RemoteClient,
    table: &str,
    id: &str,
    payload: &P,
) -> Result<()> {
    remote
        .update(table, serde_json::to_value(payload)?, &[Filter::eq("id", id)])
        .await
}

pub async fn delete_by_id(remote: &dyn RemoteClient, table: &str, id: &str) -> Result<()> {
    remote.delete(table, &[Filter::eq("id", id)]).await
}

/// Builds the client for `config`: the HTTP client when the backend is
/// configured, otherwise a stub that fails every call.
pub fn connect(config: &Config) -> Arc<dyn RemoteClient> {
    match config.backend() {
        Some(backend) => match HttpClient::new(backend, config.session_file()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build backend client, running degraded");
                Arc::new(StubClient::new())
            }
        },
        None => {
            tracing::warn!("Backend credentials are missing, every remote call will fail");
            Arc::new(StubClient::new())
        }
    }
}
