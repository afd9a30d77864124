use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{AuthChangeEvent, AuthEvent, AuthUser, Session};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{AuthSubscription, Filter, Query, RemoteClient, SignUp, AUTH_EVENT_CAPACITY};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the hosted backend's auth (`/auth/v1`) and row (`/rest/v1`) APIs.
///
/// The session is owned here. When a session file is configured the client
/// keeps it across process restarts, the same way the browser SDK keeps it
/// in its own storage.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| chrono::Utc::now().timestamp() + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            user: self.user,
        }
    }
}

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(code)) => Some(code.clone()),
            _ => self.error_code.clone(),
        }
    }

    fn message(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }
}

/// Claims read from an access token without verifying its signature. Only
/// used to decide whether the token is worth presenting to the backend.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

pub(crate) fn peek_claims(token: &str) -> Option<AccessClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    jsonwebtoken::decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

/// Query-string pairs for a row select.
pub(crate) fn select_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.columns.replace(' ', ""))];
    params.extend(filter_params(&query.filters));
    params
}

pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value)))
        .collect()
}

impl HttpClient {
    pub fn new(config: BackendConfig, session_file: Option<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        let session = session_file.as_ref().and_then(|path| load_session(path));
        Ok(Self {
            http,
            base_url: config.url,
            anon_key: config.anon_key,
            session: RwLock::new(session),
            session_file,
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        if let Some(path) = &self.session_file {
            let result = match &session {
                Some(s) => save_session(path, s),
                None => match std::fs::remove_file(path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(()),
                },
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to persist session file");
            }
        }
        *self.session.write().unwrap_or_else(|p| p.into_inner()) = session;
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let _ = self.events.send(AuthEvent::new(event, session));
    }

    /// Request carrying the public key and, when signed in, the user's token.
    fn request(&self, method: Method, url: String, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.anon_key).to_string();
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    fn user_request(&self, method: Method, url: String) -> RequestBuilder {
        let session = self.current_session();
        self.request(method, url, session.as_ref().map(|s| s.access_token.as_str()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let resp = self
            .request(Method::POST, self.auth_url("token?grant_type=refresh_token"), None)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let resp = check_auth(resp).await?;
        let session = resp.json::<TokenResponse>().await?.into_session();
        self.store_session(Some(session.clone()));
        self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser> {
        let resp = self
            .request(Method::GET, self.auth_url("user"), Some(access_token))
            .send()
            .await?;
        Ok(check_auth(resp).await?.json::<AuthUser>().await?)
    }
}

fn load_session(path: &Path) -> Option<Session> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable session file");
            None
        }
    }
}

fn save_session(path: &Path, session: &Session) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(session)?)?;
    Ok(())
}

async fn error_from(resp: Response) -> AppError {
    let status = resp.status();
    let body: ErrorBody = resp.json().await.unwrap_or_default();
    let message = body
        .message()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    AppError::backend(status.as_u16(), body.code(), message)
}

async fn check(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from(resp).await)
    }
}

/// Like [`check`], but client errors from the auth API become [`AppError::AuthError`].
async fn check_auth(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    match error_from(resp).await {
        AppError::Backend { message, .. } if status.is_client_error() => Err(AppError::AuthError(message)),
        other => Err(other),
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp> {
        let resp = self
            .request(Method::POST, self.auth_url("signup"), None)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await?;
        let body: Value = check_auth(resp).await?.json().await?;

        // With auto-confirm the backend answers with a full session, otherwise
        // with the bare user awaiting email confirmation.
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
            self.store_session(Some(session.clone()));
            self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
            Ok(SignUp {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user_value = body.get("user").cloned().unwrap_or(body);
            Ok(SignUp {
                user: serde_json::from_value(user_value)?,
                session: None,
            })
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let resp = self
            .request(Method::POST, self.auth_url("token?grant_type=password"), None)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let session = check_auth(resp).await?.json::<TokenResponse>().await?.into_session();
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.store_session(Some(session.clone()));
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.current_session() {
            let result = self
                .request(Method::POST, self.auth_url("logout"), Some(&session.access_token))
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() && resp.status() != StatusCode::UNAUTHORIZED => {
                    tracing::warn!(status = %resp.status(), "Backend logout failed, clearing local session anyway");
                }
                Err(e) => tracing::warn!(error = %e, "Backend logout failed, clearing local session anyway"),
                _ => {}
            }
        }
        self.store_session(None);
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }
        match session.refresh_token.as_deref() {
            Some(refresh_token) => match self.refresh(refresh_token).await {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    tracing::warn!(error = %e, "Session refresh failed");
                    self.store_session(None);
                    self.emit(AuthChangeEvent::SignedOut, None);
                    Ok(None)
                }
            },
            None => {
                self.store_session(None);
                Ok(None)
            }
        }
    }

    async fn set_session(&self, access_token: &str, refresh_token: Option<&str>) -> Result<Session> {
        let claims = peek_claims(access_token);
        let expired = claims
            .as_ref()
            .and_then(|c| c.exp)
            .map(|exp| exp <= chrono::Utc::now().timestamp())
            .unwrap_or(false);

        if expired {
            let refresh_token = refresh_token
                .ok_or_else(|| AppError::AuthError("Access token expired and no refresh token given".to_string()))?;
            tracing::debug!("Access token already expired, refreshing");
            return self.refresh(refresh_token).await;
        }

        let user = self.fetch_user(access_token).await?;
        if let Some(sub) = claims.as_ref().and_then(|c| c.sub.as_deref()) {
            if sub != user.id {
                return Err(AppError::AuthError("Token subject does not match user".to_string()));
            }
        }
        let mut session = Session::new(access_token, refresh_token.map(str::to_string), user);
        session.expires_at = claims.and_then(|c| c.exp);
        self.store_session(Some(session.clone()));
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn update_password(&self, password: &str) -> Result<AuthUser> {
        let session = self.current_session().ok_or(AppError::NotSignedIn)?;
        let resp = self
            .request(Method::PUT, self.auth_url("user"), Some(&session.access_token))
            .json(&json!({ "password": password }))
            .send()
            .await?;
        let user = check_auth(resp).await?.json::<AuthUser>().await?;
        self.emit(AuthChangeEvent::UserUpdated, Some(session));
        Ok(user)
    }

    async fn send_password_reset_email(&self, email: &str, redirect_to: &str) -> Result<()> {
        let resp = self
            .request(Method::POST, self.auth_url("recover"), None)
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email }))
            .send()
            .await?;
        check_auth(resp).await?;
        Ok(())
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<()> {
        let resp = self
            .request(Method::POST, self.auth_url("otp"), None)
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email, "create_user": false }))
            .send()
            .await?;
        check_auth(resp).await?;
        Ok(())
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let resp = self
            .user_request(Method::GET, self.rest_url(&query.table))
            .query(&select_params(query))
            .send()
            .await?;
        Ok(check(resp).await?.json::<Vec<Value>>().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let resp = self
            .user_request(Method::POST, self.rest_url(table))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let mut rows = check(resp).await?.json::<Vec<Value>>().await?;
        if rows.is_empty() {
            return Err(AppError::Internal(format!("insert into {} returned no row", table)));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<()> {
        let resp = self
            .user_request(Method::PATCH, self.rest_url(table))
            .query(&filter_params(filters))
            .json(&patch)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        let resp = self
            .user_request(Method::DELETE, self.rest_url(table))
            .query(&filter_params(filters))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
        aud: String,
    }

    fn token(exp: i64) -> String {
        let claims = TestClaims {
            sub: "u1".to_string(),
            exp,
            aud: "authenticated".to_string(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-secret")).unwrap()
    }

    #[test]
    fn test_peek_claims_ignores_signature_and_expiry() {
        let past = chrono::Utc::now().timestamp() - 60;
        let claims = peek_claims(&token(past)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(claims.exp, Some(past));
    }

    #[test]
    fn test_peek_claims_on_opaque_token() {
        assert!(peek_claims("abc123").is_none());
    }

    #[test]
    fn test_select_params() {
        let query = Query::from("appointments")
            .select("*, family_members(name)")
            .eq("user_id", "u1");
        assert_eq!(
            select_params(&query),
            vec![
                ("select".to_string(), "*,family_members(name)".to_string()),
                ("user_id".to_string(), "eq.u1".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_body_variants() {
        let rest: ErrorBody = serde_json::from_str(
            r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value"}"#,
        )
        .unwrap();
        assert_eq!(rest.code().as_deref(), Some("23505"));
        assert_eq!(rest.message().as_deref(), Some("duplicate key value"));

        let auth: ErrorBody = serde_json::from_str(
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        )
        .unwrap();
        assert_eq!(auth.code().as_deref(), Some("invalid_credentials"));
        assert_eq!(auth.message().as_deref(), Some("Invalid login credentials"));
    }

    #[test]
    fn test_token_response_computes_expiry_from_expires_in() {
        let json = r#"{"access_token":"a","refresh_token":"r","expires_in":3600,"user":{"id":"u1"}}"#;
        let session = serde_json::from_str::<TokenResponse>(json).unwrap().into_session();
        let expires_at = session.expires_at.unwrap();
        assert!(expires_at > chrono::Utc::now().timestamp());
        assert_eq!(session.token_type, "bearer");
    }

    #[test]
    fn test_session_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let config = BackendConfig {
            url: "https://x.supabase.co".to_string(),
            anon_key: "anon".to_string(),
        };
        let client = HttpClient::new(config.clone(), Some(path.clone())).unwrap();
        let user = AuthUser {
            id: "u1".to_string(),
            email: None,
            user_metadata: Value::Null,
        };
        client.store_session(Some(Session::new("a", Some("r".to_string()), user)));

        let reopened = HttpClient::new(config, Some(path.clone())).unwrap();
        assert_eq!(reopened.current_session().unwrap().user.id, "u1");

        reopened.store_session(None);
        assert!(!path.exists());
    }
}
