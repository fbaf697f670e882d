//! Persisted local configuration.
//!
//! Settings live in `config.toml` inside the configuration directory
//! (`~/.hidraulik` by default). The GitLab token is never written to that
//! file: it comes from `HIDRA_GITLAB_TOKEN` or from a separate `.token` file
//! readable only by the owner.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hidra_gitlab::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// Directory name under the home directory.
pub const CONFIG_DIR_NAME: &str = ".hidraulik";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const TOKEN_FILE_NAME: &str = ".token";

pub const CONFIG_DIR_ENV: &str = "HIDRA_CONFIG_DIR";
pub const TOKEN_ENV: &str = "HIDRA_GITLAB_TOKEN";
pub const GITLAB_URL_ENV: &str = "HIDRA_GITLAB_URL";
pub const TEMPLATE_REPO_ENV: &str = "HIDRA_TEMPLATE_REPO";

/// Backoff settings for lookups after a creation conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 4000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Hidraulik configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HidraConfig {
    pub gitlab_url: Option<String>,
    /// Path of the shared template repository, e.g. `platform/cicd-templates`
    pub template_repo: Option<String>,
    /// Git ref templates are read from
    pub template_ref: String,
    /// Branch generated files are committed to
    pub target_branch: String,
    pub retry: RetrySettings,
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for HidraConfig {
    fn default() -> Self {
        Self {
            gitlab_url: None,
            template_repo: None,
            template_ref: "main".to_string(),
            target_branch: "main".to_string(),
            retry: RetrySettings::default(),
            token: None,
        }
    }
}

impl HidraConfig {
    /// Whether URL, template repository and token are all present.
    pub fn is_configured(&self) -> bool {
        [&self.gitlab_url, &self.template_repo, &self.token]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Names of the missing required settings.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.gitlab_url.as_deref().map_or(true, str::is_empty) {
            missing.push("gitlab_url");
        }
        if self.template_repo.as_deref().map_or(true, str::is_empty) {
            missing.push("template_repo");
        }
        if self.token.as_deref().map_or(true, str::is_empty) {
            missing.push("token");
        }
        missing
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(GITLAB_URL_ENV).filter(|v| !v.is_empty()) {
            self.gitlab_url = Some(normalize_url(&url));
        }
        if let Some(repo) = lookup(TEMPLATE_REPO_ENV).filter(|v| !v.is_empty()) {
            self.template_repo = Some(repo);
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
    }
}

/// Normalize a GitLab URL: trimmed, no trailing `/`, `https://` when no scheme.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Reads and writes the configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at `dir`, or at `~/.hidraulik` when not given.
    pub fn locate(dir: Option<PathBuf>) -> ConfigResult<Self> {
        match dir {
            Some(dir) => Ok(Self::new(dir)),
            None => dirs::home_dir()
                .map(|home| Self::new(home.join(CONFIG_DIR_NAME)))
                .ok_or(ConfigError::NoHomeDirectory),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE_NAME)
    }

    /// Load the file and token without environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load_file(&self) -> ConfigResult<HidraConfig> {
        let path = self.config_path();
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<HidraConfig>(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            debug!("No configuration at {}", path.display());
            HidraConfig::default()
        };

        if let Some(url) = config.gitlab_url.take() {
            config.gitlab_url = Some(normalize_url(&url));
        }
        config.token = self.load_token()?;
        Ok(config)
    }

    /// Load the configuration and apply the process environment.
    pub fn load(&self) -> ConfigResult<HidraConfig> {
        let mut config = self.load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Write `config.toml`. The token is not part of it.
    pub fn save(&self, config: &HidraConfig) -> ConfigResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let content =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        let path = self.config_path();
        fs::write(&path, content)?;
        debug!("Saved configuration to {}", path.display());
        Ok(path)
    }

    /// Write the token file with owner-only permissions.
    pub fn save_token(&self, token: &str) -> ConfigResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.token_path();
        fs::write(&path, token.trim())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            if let Err(e) = fs::set_permissions(&path, permissions) {
                warn!("Failed to restrict token file permissions: {}", e);
            }
        }

        Ok(path)
    }

    fn load_token(&self) -> ConfigResult<Option<String>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let token = fs::read_to_string(path)?.trim().to_string();
        Ok(if token.is_empty() { None } else { Some(token) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" gitlab.com/ "), "https://gitlab.com");
        assert_eq!(normalize_url("http://git.local//"), "http://git.local");
        assert_eq!(normalize_url("https://gitlab.example.com"), "https://gitlab.example.com");
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::new(dir.path()).load_file().unwrap();
        assert_eq!(config, HidraConfig::default());
        assert!(!config.is_configured());
        assert_eq!(config.missing(), vec!["gitlab_url", "template_repo", "token"]);
    }

    #[test]
    fn test_save_and_load_keeps_token_out_of_toml() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested"));

        let config = HidraConfig {
            gitlab_url: Some("https://gitlab.example.com".to_string()),
            template_repo: Some("platform/templates".to_string()),
            token: Some("glpat-secret".to_string()),
            ..Default::default()
        };
        store.save(&config).unwrap();
        store.save_token("glpat-secret\n").unwrap();

        let toml = fs::read_to_string(store.config_path()).unwrap();
        assert!(!toml.contains("glpat-secret"));

        let loaded = store.load_file().unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.is_configured());
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let path = store.save_token("t").unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "gitlab_url = \"gitlab.internal/\"\n[retry]\nmax_attempts = 2\n",
        )
        .unwrap();

        let config = ConfigStore::new(dir.path()).load_file().unwrap();
        assert_eq!(config.gitlab_url.as_deref(), Some("https://gitlab.internal"));
        assert_eq!(config.template_ref, "main");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 4000);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "gitlab_url = [").unwrap();
        let err = ConfigStore::new(dir.path()).load_file().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (GITLAB_URL_ENV, "gitlab.env"),
            (TEMPLATE_REPO_ENV, "env/templates"),
            (TOKEN_ENV, "env-token"),
        ]
        .into_iter()
        .collect();

        let mut config = HidraConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.gitlab_url.as_deref(), Some("https://gitlab.env"));
        assert_eq!(config.template_repo.as_deref(), Some("env/templates"));
        assert!(config.is_configured());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetrySettings::default().to_policy();
        assert_eq!(policy, RetryPolicy::default());
    }
}
