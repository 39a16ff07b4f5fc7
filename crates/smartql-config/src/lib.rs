//! Shared configuration for applications embedding smartql.
//!
//! TOML settings merged with `SMARTQL_` environment variables, named
//! GraphQL client profiles with credential resolution (env + keyring +
//! plaintext), translation of `[defaults]` into smartql-core `$query`
//! defaults, and tracing setup ([`logging`]).

pub mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use smartql_core::{ApolloDeclaration, CoreError, FetchPolicy, OperationConfig};

pub use logging::{LoggingSettings, init_tracing};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for client '{client}'")]
    NoCredentials { client: String },

    #[error("unknown client profile '{client}'")]
    UnknownClient { client: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("tracing setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Client profile used when an operation names none.
    pub default_client: Option<String>,

    /// Defaults applied to every smart query (`$query`).
    #[serde(default)]
    pub defaults: Defaults,

    /// Named GraphQL client profiles.
    #[serde(default)]
    pub clients: HashMap<String, ClientProfile>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Apollo spelling, e.g. "cache-and-network".
    pub fetch_policy: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub throttle_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub notify_on_network_status_change: Option<bool>,
    /// Numeric host field adjusted while queries load.
    pub loading_key: Option<String>,
    #[serde(default)]
    pub deep: bool,
}

/// A named GraphQL endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientProfile {
    /// HTTP endpoint (e.g., "https://api.example.com/graphql").
    pub endpoint: String,

    /// WebSocket endpoint for subscriptions.
    pub ws_endpoint: Option<String>,

    /// Bearer token in plaintext. Prefer keyring or `token_env`.
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,
}

impl ClientProfile {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ws_endpoint: None,
            token: None,
            token_env: None,
            timeout: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "smartql", "smartql").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("smartql");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing files are fine) + `SMARTQL_` environment.
///
/// Nested keys use a double underscore: `SMARTQL_DEFAULTS__FETCH_POLICY`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    tracing::debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SMARTQL_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    /// Check cross-field references and value formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.default_client {
            if !self.clients.contains_key(name) {
                return Err(ConfigError::UnknownClient {
                    client: name.clone(),
                });
            }
        }
        for profile in self.clients.values() {
            parse_url("endpoint", &profile.endpoint)?;
            if let Some(ws) = &profile.ws_endpoint {
                parse_url("ws_endpoint", ws)?;
            }
        }
        parse_fetch_policy(self.defaults.fetch_policy.as_deref())?;
        Ok(())
    }

    pub fn client(&self, name: &str) -> Result<&ClientProfile, ConfigError> {
        self.clients
            .get(name)
            .ok_or_else(|| ConfigError::UnknownClient {
                client: name.into(),
            })
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

fn parse_fetch_policy(raw: Option<&str>) -> Result<Option<FetchPolicy>, ConfigError> {
    raw.map(|policy| {
        policy.parse::<FetchPolicy>().map_err(|_| ConfigError::Validation {
            field: "fetch_policy".into(),
            reason: format!("unknown fetch policy '{policy}'"),
        })
    })
    .transpose()
}

// ── Operation defaults ──────────────────────────────────────────────

/// Translate `[defaults]` into `$query` defaults.
pub fn query_defaults(defaults: &Defaults) -> Result<OperationConfig, ConfigError> {
    let mut config = OperationConfig::default();
    config.fetch_policy = parse_fetch_policy(defaults.fetch_policy.as_deref())?;
    config.poll_interval = defaults.poll_interval_ms.map(Duration::from_millis);
    config.throttle = defaults.throttle_ms.map(Duration::from_millis);
    config.debounce = defaults.debounce_ms.map(Duration::from_millis);
    config.notify_on_network_status_change = defaults.notify_on_network_status_change;
    Ok(config)
}

/// Provider-level default declaration: `$query` defaults, `$loadingKey`,
/// `$deep` and the default client.
pub fn default_declaration(cfg: &Config) -> Result<ApolloDeclaration, ConfigError> {
    let mut declaration =
        ApolloDeclaration::new().query_defaults(query_defaults(&cfg.defaults)?);
    if let Some(key) = &cfg.defaults.loading_key {
        declaration = declaration.loading_key(key.clone());
    }
    if cfg.defaults.deep {
        declaration = declaration.deep(true);
    }
    if let Some(client) = &cfg.default_client {
        declaration = declaration.client(client.clone());
    }
    Ok(declaration)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a client's bearer token: env var → keyring → plaintext.
pub fn resolve_token(profile: &ClientProfile, client: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("smartql", &format!("{client}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        client: client.into(),
    })
}

/// Everything a transport needs to reach one endpoint.
#[derive(Debug)]
pub struct ClientEndpoint {
    pub name: String,
    pub endpoint: Url,
    pub ws_endpoint: Option<Url>,
    /// `None` for endpoints that need no authentication.
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

/// Build a [`ClientEndpoint`] from a profile.
pub fn profile_to_endpoint(
    profile: &ClientProfile,
    client: &str,
) -> Result<ClientEndpoint, ConfigError> {
    let endpoint = parse_url("endpoint", &profile.endpoint)?;
    let ws_endpoint = profile
        .ws_endpoint
        .as_deref()
        .map(|ws| parse_url("ws_endpoint", ws))
        .transpose()?;

    let token = match resolve_token(profile, client) {
        Ok(token) => Some(token),
        Err(ConfigError::NoCredentials { .. }) => None,
        Err(err) => return Err(err),
    };

    Ok(ClientEndpoint {
        name: client.into(),
        endpoint,
        ws_endpoint,
        token,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(30)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_reads_clients_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
default_client = "main"

[defaults]
fetch_policy = "cache-and-network"
throttle_ms = 250
loading_key = "pending"

[clients.main]
endpoint = "https://api.example.com/graphql"
ws_endpoint = "wss://api.example.com/graphql"
token = "plain"
"#,
        );

        let config = load_config_from(&path).unwrap();

        assert_eq!(config.default_client.as_deref(), Some("main"));
        assert_eq!(config.defaults.throttle_ms, Some(250));
        assert_eq!(
            config.client("main").unwrap().ws_endpoint.as_deref(),
            Some("wss://api.example.com/graphql")
        );
        assert_eq!(config.logging, LoggingSettings::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.clients.is_empty());
        assert_eq!(config.defaults, Defaults::default());
    }

    #[test]
    fn test_unknown_default_client_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "default_client = \"ghost\"\n");

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownClient { client } if client == "ghost"));
    }

    #[test]
    fn test_bad_fetch_policy_is_rejected() {
        let defaults = Defaults {
            fetch_policy: Some("sometimes".into()),
            ..Defaults::default()
        };
        let err = query_defaults(&defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "fetch_policy"));
    }

    #[test]
    fn test_save_then_load_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config
            .clients
            .insert("main".into(), ClientProfile::new("https://api.example.com/graphql"));
        config.default_client = Some("main".into());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.clients, config.clients);
        assert_eq!(loaded.default_client, config.default_client);
    }

    #[test]
    fn test_query_defaults_translate_durations_and_policy() {
        let defaults = Defaults {
            fetch_policy: Some("network-only".into()),
            poll_interval_ms: Some(5_000),
            debounce_ms: Some(300),
            ..Defaults::default()
        };
        let config = query_defaults(&defaults).unwrap();

        assert_eq!(config.fetch_policy, Some(FetchPolicy::NetworkOnly));
        assert_eq!(config.poll_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.debounce, Some(Duration::from_millis(300)));
        assert_eq!(config.throttle, None);
    }

    #[test]
    fn test_default_declaration_carries_loading_key_and_client() {
        let mut config = Config::default();
        config.defaults.loading_key = Some("pending".into());
        config.defaults.deep = true;
        config.default_client = Some("main".into());

        let declaration = default_declaration(&config).unwrap();

        assert!(declaration.query_defaults.is_some());
        assert_eq!(declaration.deep, Some(true));
        assert!(declaration.loading_key.is_some());
        assert!(declaration.client.is_some());
    }

    #[test]
    fn test_plaintext_token_is_the_last_resort() {
        let mut profile = ClientProfile::new("https://api.example.com/graphql");
        profile.token_env = Some("SMARTQL_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        profile.token = Some("plain".into());

        let token = resolve_token(&profile, "smartql-test-client").unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn test_endpoint_without_credentials_is_anonymous() {
        let profile = ClientProfile::new("https://api.example.com/graphql");
        let endpoint = profile_to_endpoint(&profile, "smartql-test-anonymous").unwrap();

        assert!(endpoint.token.is_none());
        assert_eq!(endpoint.timeout, Duration::from_secs(30));
        assert_eq!(endpoint.endpoint.host_str(), Some("api.example.com"));
    }

    #[test]
    fn test_invalid_endpoint_url_is_rejected() {
        let profile = ClientProfile::new("not a url");
        let err = profile_to_endpoint(&profile, "broken").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { field, .. } if field == "endpoint"));
    }

    #[test]
    fn test_config_error_converts_into_core_error() {
        let err: CoreError = ConfigError::UnknownClient {
            client: "ghost".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Config { message } if message.contains("ghost")));
    }
}
