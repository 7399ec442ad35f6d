use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "pagetool/0.2";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIG_FILENAME: &str = "pagetool.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteConfig {
    #[serde(default)]
    pub site: SiteSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: Option<String>,
}

impl SiteConfig {
    /// Resolve the service base URL: env PAGETOOL_BASE_URL > config.
    pub fn base_url(&self) -> Option<String> {
        env_string("PAGETOOL_BASE_URL").or_else(|| self.site.base_url.clone())
    }

    /// Resolve the account name: env PAGETOOL_USERNAME > config.
    pub fn username(&self) -> Option<String> {
        env_string("PAGETOOL_USERNAME").or_else(|| self.site.username.clone())
    }

    /// Resolve the account password: env PAGETOOL_PASSWORD > config.
    pub fn password(&self) -> Option<String> {
        env_string("PAGETOOL_PASSWORD").or_else(|| self.site.password.clone())
    }

    /// Resolve the user agent: env PAGETOOL_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        env_string("PAGETOOL_USER_AGENT")
            .or_else(|| self.site.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the HTTP timeout: env PAGETOOL_HTTP_TIMEOUT_MS > default.
    pub fn timeout_ms(&self) -> u64 {
        env_string("PAGETOOL_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

/// Load a SiteConfig from a TOML file. Returns defaults if the file does
/// not exist.
pub fn load_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Pick the config path: explicit flag > PAGETOOL_CONFIG env > default
/// filename in the working directory.
pub fn resolve_config_path(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    if let Some(path) = env_string("PAGETOOL_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILENAME)
}

fn env_string(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_site_values() {
        let config = SiteConfig::default();
        assert!(config.site.base_url.is_none());
        assert!(config.site.username.is_none());
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(config.timeout_ms(), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/pagetool.toml")).expect("load config");
        assert!(config.site.base_url.is_none());
    }

    #[test]
    fn load_config_parses_site_section() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("pagetool.toml");
        fs::write(
            &config_path,
            r#"
[site]
base_url = "https://wiki.example.org"
username = "editor"
password = "secret"
user_agent = "test-agent/1.0"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.site.base_url.as_deref(),
            Some("https://wiki.example.org")
        );
        assert_eq!(config.site.username.as_deref(), Some("editor"));
        assert_eq!(config.site.password.as_deref(), Some("secret"));
        assert_eq!(config.site.user_agent.as_deref(), Some("test-agent/1.0"));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("pagetool.toml");
        fs::write(&config_path, "[other]\nkey = \"value\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.site.base_url.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("pagetool.toml");
        fs::write(&config_path, "[site\nbase_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn resolve_config_path_prefers_explicit_override() {
        let path = resolve_config_path(Some(Path::new("/tmp/custom.toml")));
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }
}
