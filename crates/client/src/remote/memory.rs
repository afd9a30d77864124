//! In-process backend with the same contract as the hosted service.
//!
//! Tables are JSON rows keyed by collection name. Embedded selects and delete
//! cascades follow a small relation registry matching the famcare schema.
//! Faults can be injected per table and operation, and session establishment
//! can be made slow, hanging or rejected to exercise the recovery flow.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::rows::tables;
use shared::{AuthChangeEvent, AuthEvent, AuthUser, Session};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{AuthSubscription, Filter, Query, RemoteClient, SignUp, AUTH_EVENT_CAPACITY};
use crate::error::{AppError, Result, UNIQUE_VIOLATION};

const SESSION_TTL_SECS: i64 = 3600;

/// Row operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Select,
    Insert,
    Update,
    Delete,
}

/// How `set_session` behaves.
#[derive(Debug, Clone)]
enum SetSessionMode {
    Normal,
    Delay(Duration),
    Hang,
    Reject(String),
}

#[derive(Debug, Clone)]
enum Relation {
    /// Child rows whose `foreign_key` equals the parent's id.
    HasMany { table: &'static str, foreign_key: &'static str },
    /// The row referenced by the parent's `foreign_key`.
    BelongsTo { table: &'static str, foreign_key: &'static str },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    user: AuthUser,
    password: String,
}

/// On-disk form used by the CLI's offline mode.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    users: Vec<StoredUser>,
    tables: BTreeMap<String, Vec<Value>>,
    session: Option<Session>,
    #[serde(default)]
    recovery_tokens: BTreeMap<String, String>,
    #[serde(default)]
    sent_links: Vec<String>,
}

pub struct MemoryBackend {
    users: DashMap<String, StoredUser>,
    tables: DashMap<String, Vec<Value>>,
    session: Mutex<Option<Session>>,
    /// Access token -> user id for one-time recovery and sign-in tokens.
    recovery_tokens: DashMap<String, String>,
    sent_links: Mutex<Vec<String>>,
    faults: Mutex<Vec<(String, FailOn)>>,
    set_session_mode: Mutex<SetSessionMode>,
    profile_trigger: bool,
    calls: DashMap<&'static str, usize>,
    events: broadcast::Sender<AuthEvent>,
    path: Option<PathBuf>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            users: DashMap::new(),
            tables: DashMap::new(),
            session: Mutex::new(None),
            recovery_tokens: DashMap::new(),
            sent_links: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            set_session_mode: Mutex::new(SetSessionMode::Normal),
            profile_trigger: false,
            calls: DashMap::new(),
            events,
            path: None,
        }
    }

    /// Emulates a server-side trigger that creates the profile row on sign-up.
    pub fn with_profile_trigger(mut self) -> Self {
        self.profile_trigger = true;
        self
    }

    /// Opens a backend persisted at `path`, loading it when the file exists.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut backend = Self::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            for stored in snapshot.users {
                backend.users.insert(normalize_email(stored.user.email.as_deref().unwrap_or_default()), stored);
            }
            for (table, rows) in snapshot.tables {
                backend.tables.insert(table, rows);
            }
            *lock(&backend.session) = snapshot.session;
            for (token, user_id) in snapshot.recovery_tokens {
                backend.recovery_tokens.insert(token, user_id);
            }
            *lock(&backend.sent_links) = snapshot.sent_links;
        }
        backend.path = Some(path);
        Ok(backend)
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let snapshot = Snapshot {
            users: self.users.iter().map(|e| e.value().clone()).collect(),
            tables: self
                .tables
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            session: lock(&self.session).clone(),
            recovery_tokens: self
                .recovery_tokens
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            sent_links: lock(&self.sent_links).clone(),
        };
        let result = serde_json::to_string_pretty(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)?;
                Ok(())
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %path.display(), "Failed to persist offline backend");
        }
    }

    // ------------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------------

    /// Makes the next `op` on `table` fail with a backend error.
    pub fn fail_next(&self, table: &str, op: FailOn) {
        lock(&self.faults).push((table.to_string(), op));
    }

    pub fn hang_set_session(&self) {
        *lock(&self.set_session_mode) = SetSessionMode::Hang;
    }

    pub fn delay_set_session(&self, delay: Duration) {
        *lock(&self.set_session_mode) = SetSessionMode::Delay(delay);
    }

    pub fn reject_set_session(&self, message: &str) {
        *lock(&self.set_session_mode) = SetSessionMode::Reject(message.to_string());
    }

    /// Registers a one-time recovery token pair for an existing account.
    pub fn issue_recovery_tokens(&self, email: &str, access_token: &str) -> Result<()> {
        let user_id = self
            .users
            .get(&normalize_email(email))
            .map(|u| u.user.id.clone())
            .ok_or_else(|| AppError::NotFound(format!("user {}", email)))?;
        self.recovery_tokens.insert(access_token.to_string(), user_id);
        Ok(())
    }

    /// Links "emailed" so far, oldest first.
    pub fn sent_recovery_links(&self) -> Vec<String> {
        lock(&self.sent_links).clone()
    }

    /// Issues a one-time token pair and records the link carrying it.
    fn send_link(&self, email: &str, redirect_to: &str, kind: &str) -> Result<()> {
        // Unknown addresses succeed silently so accounts cannot be enumerated.
        if !self.users.contains_key(&normalize_email(email)) {
            return Ok(());
        }
        let access = format!("{}-{}", kind, Uuid::new_v4().simple());
        let refresh = format!("refresh-{}", Uuid::new_v4().simple());
        self.issue_recovery_tokens(email, &access)?;
        let link = format!(
            "{}#access_token={}&refresh_token={}&expires_in={}&token_type=bearer&type={}",
            redirect_to, access, refresh, SESSION_TTL_SECS, kind
        );
        if self.path.is_some() {
            tracing::info!(link = %link, "Link issued; offline mode sends no email");
        }
        lock(&self.sent_links).push(link);
        self.persist();
        Ok(())
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    pub fn password_matches(&self, email: &str, password: &str) -> bool {
        self.users
            .get(&normalize_email(email))
            .map(|u| u.password == password)
            .unwrap_or(false)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.get(table).map(|r| r.clone()).unwrap_or_default()
    }

    /// Writes a row directly, bypassing constraints and faults.
    pub fn seed(&self, table: &str, row: Value) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn record(&self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn take_fault(&self, table: &str, op: FailOn) -> Result<()> {
        let mut faults = lock(&self.faults);
        if let Some(pos) = faults.iter().position(|(t, o)| t == table && *o == op) {
            faults.remove(pos);
            return Err(AppError::backend(
                500,
                None,
                format!("injected {:?} failure on {}", op, table),
            ));
        }
        Ok(())
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No receivers is fine.
        let _ = self.events.send(AuthEvent::new(event, session));
    }

    fn open_session(&self, user: AuthUser) -> Session {
        let session = Session::new(
            format!("access-{}", Uuid::new_v4()),
            Some(format!("refresh-{}", Uuid::new_v4())),
            user,
        )
        .with_expiry(chrono::Utc::now().timestamp() + SESSION_TTL_SECS);
        *lock(&self.session) = Some(session.clone());
        session
    }

    fn find_user_by_id(&self, user_id: &str) -> Option<AuthUser> {
        self.users
            .iter()
            .find(|u| u.user.id == user_id)
            .map(|u| u.user.clone())
    }

    fn relation(table: &str, name: &str) -> Option<Relation> {
        match (table, name) {
            (tables::FAMILY_MEMBERS, tables::MEDICATIONS) => Some(Relation::HasMany {
                table: tables::MEDICATIONS,
                foreign_key: "member_id",
            }),
            (tables::FAMILY_MEMBERS, tables::VACCINES) => Some(Relation::HasMany {
                table: tables::VACCINES,
                foreign_key: "member_id",
            }),
            (tables::APPOINTMENTS, tables::FAMILY_MEMBERS) => Some(Relation::BelongsTo {
                table: tables::FAMILY_MEMBERS,
                foreign_key: "patient_id",
            }),
            _ => None,
        }
    }

    /// Tables whose rows are removed along with a deleted row of `table`.
    fn cascades(table: &str) -> &'static [(&'static str, &'static str)] {
        match table {
            tables::FAMILY_MEMBERS => &[
                (tables::MEDICATIONS, "member_id"),
                (tables::VACCINES, "member_id"),
                (tables::APPOINTMENTS, "patient_id"),
            ],
            _ => &[],
        }
    }

    fn embed(&self, table: &str, row: &Value, columns: &str) -> Value {
        let Some(source) = row.as_object() else {
            return row.clone();
        };
        let mut out = Map::new();
        for item in split_columns(columns) {
            match item.split_once('(') {
                Some((name, rest)) => {
                    let name = name.trim();
                    let inner = rest.trim_end_matches(')');
                    let value = match Self::relation(table, name) {
                        Some(Relation::HasMany { table: child, foreign_key }) => {
                            let id = source.get("id").map(column_text).unwrap_or_default();
                            Value::Array(
                                self.rows(child)
                                    .iter()
                                    .filter(|r| r.get(foreign_key).map(column_text).as_deref() == Some(id.as_str()))
                                    .map(|r| project(r, inner))
                                    .collect(),
                            )
                        }
                        Some(Relation::BelongsTo { table: parent, foreign_key }) => {
                            let key = source.get(foreign_key).map(column_text);
                            self.rows(parent)
                                .iter()
                                .find(|r| r.get("id").map(column_text) == key)
                                .map(|r| project(r, inner))
                                .unwrap_or(Value::Null)
                        }
                        None => Value::Null,
                    };
                    out.insert(name.to_string(), value);
                }
                None if item == "*" => {
                    for (k, v) in source {
                        out.insert(k.clone(), v.clone());
                    }
                }
                None => {
                    if let Some(v) = source.get(item) {
                        out.insert(item.to_string(), v.clone());
                    }
                }
            }
        }
        Value::Object(out)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Column value as compared by equality filters.
fn column_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(&f.column).map(column_text).as_deref() == Some(f.value.as_str()))
}

/// Splits a select string on top-level commas.
fn split_columns(columns: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in columns.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(columns[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(columns[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn project(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let mut out = Map::new();
    for column in split_columns(columns) {
        if let Some(v) = row.get(column) {
            out.insert(column.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl RemoteClient for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp> {
        self.record("sign_up");
        let key = normalize_email(email);
        if self.users.contains_key(&key) {
            return Err(AppError::AuthError("User already registered".to_string()));
        }
        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email: Some(key.clone()),
            user_metadata: metadata.clone(),
        };
        self.users.insert(
            key.clone(),
            StoredUser {
                user: user.clone(),
                password: password.to_string(),
            },
        );

        if self.profile_trigger {
            self.seed(
                tables::PROFILES,
                serde_json::json!({
                    "id": user.id,
                    "first_name": metadata.get("first_name").cloned().unwrap_or(Value::Null),
                    "last_name": metadata.get("last_name").cloned().unwrap_or(Value::Null),
                    "email": key,
                    "role": "admin",
                }),
            );
        }

        let session = self.open_session(user.clone());
        self.persist();
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(SignUp {
            user,
            session: Some(session),
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.record("sign_in_with_password");
        let user = self
            .users
            .get(&normalize_email(email))
            .filter(|u| u.password == password)
            .map(|u| u.user.clone())
            .ok_or_else(|| AppError::AuthError("Invalid login credentials".to_string()))?;
        let session = self.open_session(user);
        self.persist();
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.record("sign_out");
        *lock(&self.session) = None;
        self.persist();
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        self.record("get_session");
        let session = lock(&self.session).clone();
        Ok(session.filter(|s| !s.is_expired()))
    }

    async fn set_session(&self, access_token: &str, refresh_token: Option<&str>) -> Result<Session> {
        self.record("set_session");
        let mode = lock(&self.set_session_mode).clone();
        match mode {
            SetSessionMode::Normal => {}
            SetSessionMode::Delay(delay) => tokio::time::sleep(delay).await,
            SetSessionMode::Hang => return std::future::pending().await,
            SetSessionMode::Reject(message) => return Err(AppError::AuthError(message)),
        }

        let (_, user_id) = self
            .recovery_tokens
            .remove(access_token)
            .ok_or_else(|| AppError::AuthError("Invalid or expired token".to_string()))?;
        let user = self
            .find_user_by_id(&user_id)
            .ok_or_else(|| AppError::AuthError("User not found".to_string()))?;

        let session = Session::new(access_token, refresh_token.map(str::to_string), user)
            .with_expiry(chrono::Utc::now().timestamp() + SESSION_TTL_SECS);
        *lock(&self.session) = Some(session.clone());
        self.persist();
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn update_password(&self, password: &str) -> Result<AuthUser> {
        self.record("update_password");
        let session = lock(&self.session)
            .clone()
            .ok_or_else(|| AppError::AuthError("Auth session missing".to_string()))?;
        let email = normalize_email(session.user.email.as_deref().unwrap_or_default());
        let mut stored = self
            .users
            .get_mut(&email)
            .ok_or_else(|| AppError::AuthError("User not found".to_string()))?;
        stored.password = password.to_string();
        let user = stored.user.clone();
        drop(stored);
        self.persist();
        self.emit(AuthChangeEvent::UserUpdated, Some(session));
        Ok(user)
    }

    async fn send_password_reset_email(&self, email: &str, redirect_to: &str) -> Result<()> {
        self.record("send_password_reset_email");
        self.send_link(email, redirect_to, "recovery")
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> Result<()> {
        self.record("send_magic_link");
        self.send_link(email, redirect_to, "magiclink")
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.record("select");
        self.take_fault(&query.table, FailOn::Select)?;
        Ok(self
            .rows(&query.table)
            .iter()
            .filter(|row| matches(row, &query.filters))
            .map(|row| self.embed(&query.table, row, &query.columns))
            .collect())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.record("insert");
        self.take_fault(table, FailOn::Insert)?;
        let Value::Object(mut fields) = row else {
            return Err(AppError::BadRequest("row must be a JSON object".to_string()));
        };
        let id = fields
            .get("id")
            .map(column_text)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut rows = self.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| r.get("id").map(column_text).as_deref() == Some(id.as_str())) {
            return Err(AppError::backend(
                409,
                Some(UNIQUE_VIOLATION.to_string()),
                format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
            ));
        }
        fields.insert("id".to_string(), Value::String(id));
        let stored = Value::Object(fields);
        rows.push(stored.clone());
        drop(rows);
        self.persist();
        Ok(stored)
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<()> {
        self.record("update");
        self.take_fault(table, FailOn::Update)?;
        let Value::Object(patch) = patch else {
            return Err(AppError::BadRequest("patch must be a JSON object".to_string()));
        };
        if let Some(mut rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                if let Value::Object(fields) = row {
                    for (k, v) in &patch {
                        fields.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        self.persist();
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        self.record("delete");
        self.take_fault(table, FailOn::Delete)?;
        let removed: Vec<String> = match self.tables.get_mut(table) {
            Some(mut rows) => {
                let (gone, kept): (Vec<Value>, Vec<Value>) =
                    rows.drain(..).partition(|r| matches(r, filters));
                *rows = kept;
                gone.iter()
                    .filter_map(|r| r.get("id").map(column_text))
                    .collect()
            }
            None => Vec::new(),
        };
        for (child, foreign_key) in Self::cascades(table) {
            if let Some(mut rows) = self.tables.get_mut(*child) {
                rows.retain(|r| {
                    let key = r.get(*foreign_key).map(column_text).unwrap_or_default();
                    !removed.contains(&key)
                });
            }
        }
        self.persist();
        Ok(())
    }
}
