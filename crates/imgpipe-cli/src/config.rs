// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the image pipeline CLI.

use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Default daemon base URL used when no config file or env override is present.
pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:8088";

/// Env var that overrides the daemon base URL.
pub const DAEMON_URL_ENV: &str = "IMGPIPE_DAEMON_URL";

/// Top-level CLI configuration, loaded from `imgpipe.toml` if present.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CliConfig {
    /// Base URL of the `imgpipe-daemon` HTTP API.
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,
}

fn default_daemon_url() -> String {
    DEFAULT_DAEMON_URL.to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { daemon_url: default_daemon_url() }
    }
}

/// Errors found during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidDaemonUrl { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidDaemonUrl { value } => {
                write!(f, "invalid daemon_url '{value}': must start with http:// or https://")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and parse a TOML configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;
    let config: CliConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", path.display()))?;
    Ok(config)
}

/// Validate a parsed configuration, returning any semantic errors found.
pub fn validate_config(config: &CliConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    if !config.daemon_url.starts_with("http://") && !config.daemon_url.starts_with("https://") {
        errors.push(ConfigError::InvalidDaemonUrl { value: config.daemon_url.clone() });
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Resolve the daemon URL: explicit flag, then env var, then config file, then default.
pub fn resolve_daemon_url(flag: Option<String>, config_path: Option<&Path>) -> anyhow::Result<String> {
    if let Some(url) = flag {
        return Ok(url);
    }
    if let Ok(url) = std::env::var(DAEMON_URL_ENV) {
        return Ok(url);
    }
    if let Some(path) = config_path
        && path.exists()
    {
        let config = load_config(path)?;
        return Ok(config.daemon_url);
    }
    Ok(DEFAULT_DAEMON_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_schemeless_url() {
        let config = CliConfig { daemon_url: "localhost:8088".into() };
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::InvalidDaemonUrl { .. })));
    }

    #[test]
    fn validate_accepts_http_url() {
        let config = CliConfig { daemon_url: "http://127.0.0.1:8088".into() };
        validate_config(&config).unwrap();
    }

    #[test]
    fn resolve_prefers_explicit_flag() {
        let url = resolve_daemon_url(Some("http://example.com".into()), None).unwrap();
        assert_eq!(url, "http://example.com");
    }

    #[test]
    fn default_config_uses_default_daemon_url() {
        assert_eq!(CliConfig::default().daemon_url, DEFAULT_DAEMON_URL);
    }

    #[test]
    fn resolve_reads_config_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgpipe.toml");
        std::fs::write(&path, r#"daemon_url = "http://configured:9000""#).unwrap();
        let url = resolve_daemon_url(None, Some(&path)).unwrap();
        assert_eq!(url, "http://configured:9000");
    }
}
