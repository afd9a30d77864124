use async_trait::async_trait;
use serde_json::Value;
use shared::{AuthEvent, AuthUser, Session};
use tokio::sync::broadcast;

use super::{AuthSubscription, Filter, Query, RemoteClient, SignUp};
use crate::error::{AppError, Result};

/// Stand-in used when backend credentials are missing. Every call fails with
/// [`AppError::NotConfigured`]; there is never a session.
pub struct StubClient {
    events: broadcast::Sender<AuthEvent>,
}

impl StubClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for StubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for StubClient {
    async fn sign_up(&self, _email: &str, _password: &str, _metadata: Value) -> Result<SignUp> {
        Err(AppError::NotConfigured)
    }

    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Session> {
        Err(AppError::NotConfigured)
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn set_session(&self, _access_token: &str, _refresh_token: Option<&str>) -> Result<Session> {
        Err(AppError::NotConfigured)
    }

    async fn update_password(&self, _password: &str) -> Result<AuthUser> {
        Err(AppError::NotConfigured)
    }

    async fn send_password_reset_email(&self, _email: &str, _redirect_to: &str) -> Result<()> {
        Err(AppError::NotConfigured)
    }

    async fn send_magic_link(&self, _email: &str, _redirect_to: &str) -> Result<()> {
        Err(AppError::NotConfigured)
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn select(&self, _query: &Query) -> Result<Vec<Value>> {
        Err(AppError::NotConfigured)
    }

    async fn insert(&self, _table: &str, _row: Value) -> Result<Value> {
        Err(AppError::NotConfigured)
    }

    async fn update(&self, _table: &str, _patch: Value, _filters: &[Filter]) -> Result<()> {
        Err(AppError::NotConfigured)
    }

    async fn delete(&self, _table: &str, _filters: &[Filter]) -> Result<()> {
        Err(AppError::NotConfigured)
    }
}
