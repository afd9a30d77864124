use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identity record returned by the backend's auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// Credential pair proving an authenticated identity to the remote store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is rejected.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>, user: AuthUser) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: None,
            token_type: default_token_type(),
            user,
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(ts) => ts <= now.timestamp(),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish()
    }
}

/// Kind of auth-state change pushed by the remote client to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(event: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }

    pub fn signed_out() -> Self {
        Self::new(AuthChangeEvent::SignedOut, None)
    }

    /// The user id of a logged-in session carried by this event, if any.
    pub fn session_user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: Some("ana@example.com".to_string()),
            user_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session::new("secret-access", Some("secret-refresh".to_string()), user());
        let debug = format!("{:?}", session);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("u1"));
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let session = Session::new("a", None, user()).with_expiry(now.timestamp() - 1);
        assert!(session.is_expired_at(now));
        let open = Session::new("a", None, user());
        assert!(!open.is_expired_at(now));
    }

    #[test]
    fn test_auth_event_serialization() {
        let event = AuthEvent::signed_out();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"SIGNED_OUT\""));

        let kind: AuthChangeEvent = serde_json::from_str("\"PASSWORD_RECOVERY\"").unwrap();
        assert_eq!(kind, AuthChangeEvent::PasswordRecovery);
    }

    #[test]
    fn test_session_deserializes_backend_token_response() {
        let json = r#"{"access_token":"abc","token_type":"bearer","expires_in":3600,"expires_at":1900000000,"refresh_token":"def","user":{"id":"u1","email":"ana@example.com"}}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.refresh_token.as_deref(), Some("def"));
        assert_eq!(session.expires_at, Some(1_900_000_000));
        assert_eq!(session.user.id, "u1");
    }
}
