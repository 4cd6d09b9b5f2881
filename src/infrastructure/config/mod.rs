//! Configuration management
//!
//! Settings come from an optional YAML file, then environment variables,
//! then CLI flags (applied by `main`). Application-service credentials live
//! in their own registration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::errors::ConfigError;
use crate::application::services::authorizer::{split_user_list, AllowList};
use crate::application::services::SenderPolicy;
use crate::domain::entities::Identity;

const DEFAULT_REGISTRATION_DIR: &str = "../config/";
const DEFAULT_REGISTRATION_FILE: &str = "ledger-registration.yaml";

/// Relay configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub matrix: MatrixConfig,
    pub shell: ShellConfig,
    pub whitelist: WhitelistConfig,
    pub appservice: AppserviceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MatrixConfig {
    pub homeserver: Option<String>,
    /// Full user id, e.g. `@ledger:matrix.example.com`
    pub username: Option<String>,
    pub password: Option<String>,
    pub poll_interval_ms: u64,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShellConfig {
    pub timeout_secs: u64,
}

/// Who may see replies (and, under the strict policy, run commands)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WhitelistConfig {
    pub users: Vec<String>,
    pub sender_policy: SenderPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppserviceConfig {
    pub registration: PathBuf,
    pub bind_address: String,
    /// Bot user id; derived from the registration when unset
    pub user_id: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver: None,
            username: None,
            password: None,
            poll_interval_ms: 5000,
            retry_delay_secs: 5,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self { timeout_secs: 8 }
    }
}

impl Default for AppserviceConfig {
    fn default() -> Self {
        Self {
            registration: PathBuf::from(DEFAULT_REGISTRATION_DIR).join(DEFAULT_REGISTRATION_FILE),
            bind_address: "127.0.0.1:9000".to_string(),
            user_id: None,
        }
    }
}

/// Everything the polling deployment needs, validated
#[derive(Debug, Clone)]
pub struct PollingParams {
    pub homeserver: String,
    pub user: Identity,
    pub password: String,
    pub allow_list: AllowList,
}

/// Everything the webhook deployment needs, validated
#[derive(Debug, Clone)]
pub struct AppserviceParams {
    pub hs_url: String,
    pub as_token: String,
    pub hs_token: String,
    pub user: Identity,
    pub allow_list: AllowList,
    pub bind_address: String,
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    /// File (if present) overlaid with the process environment
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Config::load(path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment variables, looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("HOMESERVER") {
            self.matrix.homeserver = Some(v);
        }
        if let Some(v) = var("USERNAME") {
            self.matrix.username = Some(v);
        }
        if let Some(v) = var("PASSWORD") {
            self.matrix.password = Some(v);
        }
        if let Some(v) = var("MATRIX_APPSERVICE_LEDGER_USERS").or_else(|| var("ALLOWED_USERS")) {
            self.whitelist.users = split_user_list(&v);
        }
        if let Some(v) = var("SH_TIMEOUT").and_then(|v| parse_or_warn::<u64>("SH_TIMEOUT", &v)) {
            self.shell.timeout_secs = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.bot.log_level = v;
        }
        if let Some(v) = var("POLL_INTERVAL_MS").and_then(|v| parse_or_warn::<u64>("POLL_INTERVAL_MS", &v)) {
            self.matrix.poll_interval_ms = v;
        }
        if let Some(v) = var("RETRY_DELAY_SECS").and_then(|v| parse_or_warn::<u64>("RETRY_DELAY_SECS", &v)) {
            self.matrix.retry_delay_secs = v;
        }
        if let Some(v) = var("REQUIRE_SENDER_ALLOWED") {
            self.whitelist.sender_policy = if v == "1" || v.eq_ignore_ascii_case("true") {
                SenderPolicy::RequireAllowed
            } else {
                SenderPolicy::RoomGateOnly
            };
        }
        if let Some(v) = var("BIND_ADDRESS") {
            self.appservice.bind_address = v;
        }

        let dir = var("MATRIX_APPSERVICE_LEDGER_CONFIG_DIR");
        let file = var("MATRIX_APPSERVICE_LEDGER_CONFIG_FILE");
        if dir.is_some() || file.is_some() {
            self.appservice.registration = PathBuf::from(dir.as_deref().unwrap_or(DEFAULT_REGISTRATION_DIR))
                .join(file.as_deref().unwrap_or(DEFAULT_REGISTRATION_FILE));
        }
    }

    pub fn sh_timeout(&self) -> Duration {
        Duration::from_secs(self.shell.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.matrix.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.matrix.retry_delay_secs)
    }

    /// Shared checks for both deployments
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("shell timeout must be at least one second".to_string()));
        }
        if self.whitelist.users.is_empty() {
            return Err(ConfigError::MissingField("allowed users".to_string()));
        }
        Ok(())
    }

    pub fn polling_params(&self) -> Result<PollingParams, ConfigError> {
        self.validate()?;
        let homeserver = required(&self.matrix.homeserver, "homeserver")?;
        let username = required(&self.matrix.username, "username")?;
        let password = required(&self.matrix.password, "password")?;
        if !username.starts_with('@') || !username.contains(':') {
            return Err(ConfigError::InvalidValue(format!(
                "username must be a full user id like @bot:example.com, got {}",
                username
            )));
        }

        let user = Identity::new(username);
        let allow_list = AllowList::new(self.whitelist.users.iter().map(Identity::new), &user);
        Ok(PollingParams {
            homeserver,
            user,
            password,
            allow_list,
        })
    }

    pub fn appservice_params(&self, registration: &Registration) -> Result<AppserviceParams, ConfigError> {
        self.validate()?;
        let user = match &self.appservice.user_id {
            Some(id) => Identity::new(id.clone()),
            None => registration.bot_identity()?,
        };
        let allow_list = AllowList::new(self.whitelist.users.iter().map(Identity::new), &user);
        Ok(AppserviceParams {
            hs_url: registration.hs_url.clone(),
            as_token: registration.as_token.clone(),
            hs_token: registration.hs_token.clone(),
            user,
            allow_list,
            bind_address: self.appservice.bind_address.clone(),
        })
    }
}

/// Application-service registration file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Registration {
    pub as_token: String,
    pub hs_token: String,
    pub hs_url: String,
    #[serde(default = "default_sender_localpart")]
    pub sender_localpart: String,
}

fn default_sender_localpart() -> String {
    "ledger".to_string()
}

impl Registration {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Parse(format!("Failed to read registration {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let registration: Registration = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse registration: {}", e)))?;
        for (name, value) in [
            ("as_token", &registration.as_token),
            ("hs_token", &registration.hs_token),
            ("hs_url", &registration.hs_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name.to_string()));
            }
        }
        Ok(registration)
    }

    /// `@<sender_localpart>:<host of hs_url>`
    pub fn bot_identity(&self) -> Result<Identity, ConfigError> {
        let url = reqwest::Url::parse(&self.hs_url)
            .map_err(|e| ConfigError::InvalidValue(format!("hs_url {}: {}", self.hs_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue(format!("hs_url {} has no host", self.hs_url)))?;
        Ok(Identity::new(format!("@{}:{}", self.sender_localpart, host)))
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(ConfigError::MissingField(name.to_string())),
    }
}

fn parse_or_warn<N: std::str::FromStr>(key: &str, value: &str) -> Option<N> {
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring {}={}: not a number", key, value);
            None
        }
    }
}
