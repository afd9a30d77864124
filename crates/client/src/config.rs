use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_APP_URL: &str = "http://localhost:5173";
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub app: AppConfig,
}

/// Backend endpoint and public key as written in the config file. Both are
/// optional so a missing value degrades instead of failing to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

/// Resolved backend credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Public origin of the application; recovery links redirect here.
    #[serde(default = "default_app_url")]
    pub url: String,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Keep the backend session between CLI invocations.
    #[serde(default = "default_true")]
    pub persist_session: bool,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}
fn default_recovery_timeout() -> u64 {
    DEFAULT_RECOVERY_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            url: default_app_url(),
            recovery_timeout_secs: default_recovery_timeout(),
            persist_session: true,
            session_file: None,
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "famcare", "famcare")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = Self::project_dirs()?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Loads `.env.local`/`.env`, then the first config file found, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        dotenvy::from_filename(".env.local").ok();
        dotenvy::dotenv().ok();

        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());

        if config.backend().is_none() {
            tracing::warn!("Backend credentials are missing. Set SUPABASE_URL and SUPABASE_ANON_KEY");
        }
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        if let Ok(path) = std::env::var("FAMCARE_CONFIG") {
            return Self::load_from_path(Path::new(&path));
        }

        let mut candidates = vec![PathBuf::from("famcare.toml")];
        if let Ok(path) = Self::config_path() {
            candidates.push(path);
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k).filter(|v| !v.trim().is_empty()));

        if let Some(url) = first(&["SUPABASE_URL", "VITE_SUPABASE_URL"]) {
            self.backend.url = Some(url);
        }
        if let Some(key) = first(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]) {
            self.backend.anon_key = Some(key);
        }
        if let Some(url) = first(&["FAMCARE_APP_URL"]) {
            self.app.url = url;
        }
        if let Some(secs) = first(&["FAMCARE_RECOVERY_TIMEOUT_SECS"]) {
            match secs.parse() {
                Ok(secs) => self.app.recovery_timeout_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "Ignoring invalid FAMCARE_RECOVERY_TIMEOUT_SECS"),
            }
        }
    }

    /// Both backend values, or `None` when either is missing.
    pub fn backend(&self) -> Option<BackendConfig> {
        let url = self.backend.url.as_deref()?.trim();
        let anon_key = self.backend.anon_key.as_deref()?.trim();
        if url.is_empty() || anon_key.is_empty() {
            return None;
        }
        Some(BackendConfig {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn session_file(&self) -> Option<PathBuf> {
        if !self.app.persist_session {
            return None;
        }
        if let Some(path) = &self.app.session_file {
            return Some(path.clone());
        }
        Self::project_dirs()
            .ok()
            .map(|dirs| dirs.data_dir().join("session.json"))
    }

    /// Backing file of the `--offline` backend.
    pub fn offline_file(&self) -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().join("offline.json"))
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.app.recovery_timeout_secs.max(1))
    }

    /// Where a sign-in link sends the user back to.
    pub fn sign_in_redirect_url(&self) -> String {
        self.app.url.trim_end_matches('/').to_string()
    }

    /// Where the recovery email sends the user back to.
    pub fn update_password_url(&self) -> String {
        format!("{}/update-password", self.app.url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_credentials_yield_no_backend() {
        let mut config = Config::default();
        config.apply_env(env(&[("SUPABASE_URL", "https://x.supabase.co")]));
        assert!(config.backend().is_none());
    }

    #[test]
    fn test_env_overrides_and_vite_prefix() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("VITE_SUPABASE_URL", "https://x.supabase.co/"),
            ("VITE_SUPABASE_ANON_KEY", "anon"),
            ("FAMCARE_RECOVERY_TIMEOUT_SECS", "9"),
        ]));
        assert_eq!(
            config.backend(),
            Some(BackendConfig {
                url: "https://x.supabase.co".to_string(),
                anon_key: "anon".to_string(),
            })
        );
        assert_eq!(config.recovery_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("SUPABASE_URL", "  "), ("SUPABASE_ANON_KEY", "k")]));
        assert!(config.backend().is_none());
    }

    #[test]
    fn test_update_password_url() {
        let mut config = Config::default();
        config.app.url = "https://app.example/".to_string();
        assert_eq!(config.update_password_url(), "https://app.example/update-password");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.backend.url = Some("https://x.supabase.co".to_string());
        config.app.recovery_timeout_secs = 3;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.backend.url.as_deref(), Some("https://x.supabase.co"));
        assert_eq!(loaded.app.recovery_timeout_secs, 3);
        assert!(loaded.app.persist_session);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[backend]\nurl = \"https://x\"\n").unwrap();
        assert_eq!(config.app.url, DEFAULT_APP_URL);
        assert_eq!(config.app.recovery_timeout_secs, DEFAULT_RECOVERY_TIMEOUT_SECS);
    }

    #[test]
    fn test_session_file_disabled() {
        let mut config = Config::default();
        config.app.persist_session = false;
        config.app.session_file = Some(PathBuf::from("/tmp/s.json"));
        assert_eq!(config.session_file(), None);
    }
}
