//! Shared configuration for Wardline clients.
//!
//! TOML profiles (which hospital backend to talk to), figment-based
//! loading (defaults → file → `WARDLINE_` env), and persistent
//! credential stores backing `wardline_api::CredentialStore`.

pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use wardline_api::ClientConfig;

pub use store::{FileCredentialStore, KeyringCredentialStore};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}' in config")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles (e.g. "staging", "production").
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Accept self-signed certificates (staging servers).
    #[serde(default)]
    pub insecure: bool,

    /// Connect the realtime invalidation socket.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: false,
            realtime: default_realtime(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_realtime() -> bool {
    true
}

/// A named backend profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Backend root URL (e.g., "https://backend.hospital.example").
    pub server: String,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Override realtime setting.
    pub realtime: Option<bool>,
}

// ── Config file paths ───────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "wardline", "wardline").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Path of the credential file for a profile (used by
/// [`FileCredentialStore`] and as the session sidecar for
/// [`KeyringCredentialStore`]).
pub fn credentials_path(profile: &str) -> PathBuf {
    ProjectDirs::from("com", "wardline", "wardline").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push(format!("credentials-{profile}.json"));
            p
        },
        |dirs| dirs.data_dir().join(format!("credentials-{profile}.json")),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("wardline");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from an explicit path (tests, --config flag).
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WARDLINE_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Pick a profile by name, falling back to the configured default.
pub fn resolve_profile<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> Result<(&'a str, &'a Profile), ConfigError> {
    let name = name
        .or(config.default_profile.as_deref())
        .unwrap_or("default");

    config
        .profiles
        .get_key_value(name)
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: name.to_owned(),
        })
}

/// Translate a profile into the api crate's transport configuration.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<(Url, ClientConfig), ConfigError> {
    let url: Url = profile.server.parse().map_err(|_| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {}", profile.server),
    })?;

    let config = ClientConfig {
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        accept_invalid_certs: profile.insecure.unwrap_or(defaults.insecure),
        ..ClientConfig::default()
    };

    Ok((url, config))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.toml")).unwrap();

        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.timeout, 30);
        assert!(config.defaults.realtime);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn profiles_load_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
                default_profile = "staging"

                [defaults]
                timeout = 10

                [profiles.staging]
                server = "https://staging.hospital.example"
                insecure = true

                [profiles.production]
                server = "https://backend.hospital.example"
                timeout = 60
            "#,
        );

        let config = load_config_from(&path).unwrap();
        let (name, profile) = resolve_profile(&config, None).unwrap();
        assert_eq!(name, "staging");

        let (url, client_config) = profile_to_client_config(profile, &config.defaults).unwrap();
        assert_eq!(url.host_str(), Some("staging.hospital.example"));
        assert!(client_config.accept_invalid_certs);
        assert_eq!(client_config.timeout, Duration::from_secs(10));

        let (_, production) = resolve_profile(&config, Some("production")).unwrap();
        let (_, client_config) = profile_to_client_config(production, &config.defaults).unwrap();
        assert_eq!(client_config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        let result = resolve_profile(&config, Some("missing"));
        assert!(matches!(result, Err(ConfigError::UnknownProfile { .. })));
    }

    #[test]
    fn invalid_server_url_is_a_validation_error() {
        let profile = Profile {
            server: "not a url".into(),
            insecure: None,
            timeout: None,
            realtime: None,
        };
        let result = profile_to_client_config(&profile, &Defaults::default());
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
