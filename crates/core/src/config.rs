//! Application configuration.
//!
//! Settings are layered: built-in defaults, then the TOML file under the
//! user's config directory, then `TIMETABLE__*` environment variables
//! (`TIMETABLE__API__BASE_URL`, `TIMETABLE__RETRY__MAX_ATTEMPTS`, ...).

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{auth::Credentials, models::Level};

/// Directory under `~/.config` and `~/.cache` used by the console.
pub const APP_DIR: &str = "timetable-console";

const CONFIG_FILE: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"# Timetable console configuration.

[api]
base_url = "http://localhost:5000"
api_key = ""
request_timeout_secs = 30

[hub]
path = "TimeTableHub"
skip_negotiation = false
connect_timeout_secs = 15
keepalive_interval_secs = 15
# Drop the connection when the hub stays silent this long.
server_timeout_secs = 30

[retry]
initial_delay_ms = 1000
max_delay_ms = 30000
max_attempts = 5

[session]
default_level = 1
levels = [1, 2, 3, 4]

[auth]
# Either a bearer token, or a username/password pair used to log in.
access_token = ""
username = ""
password = ""
"#;

/// Top level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// REST collaborator settings.
    pub api: ApiConfig,
    /// Real-time hub settings.
    pub hub: HubConfig,
    /// Reconnect policy.
    pub retry: RetryConfig,
    /// Session defaults.
    pub session: SessionSettings,
    /// Local cache location.
    pub cache: CacheConfig,
    /// Login material.
    pub auth: AuthConfig,
}

/// REST API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL shared by REST resources and the hub.
    pub base_url: String,
    /// Static key sent as `X-Api-Key`.
    pub api_key: String,
    /// Per request timeout.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            api_key: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Hub connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Hub path appended to the base URL.
    pub path: String,
    /// Connect straight over websockets without the negotiate round trip.
    pub skip_negotiation: bool,
    /// Upper bound for negotiate + upgrade + handshake.
    pub connect_timeout_secs: u64,
    /// Interval between keepalive invocations while connected.
    pub keepalive_interval_secs: u64,
    /// Silence from the hub after which the connection counts as lost.
    pub server_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            path: "TimeTableHub".to_string(),
            skip_negotiation: false,
            connect_timeout_secs: 15,
            keepalive_interval_secs: 15,
            server_timeout_secs: 30,
        }
    }
}

impl HubConfig {
    /// Bound on negotiate plus upgrade.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Interval between keepalive invocations, at least a second.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    /// Never shorter than two keepalive intervals.
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(
            self.server_timeout_secs
                .max(self.keepalive_interval_secs.max(1) * 2),
        )
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Cap applied to the doubling delay.
    pub max_delay_ms: u64,
    /// Automatic attempts before a manual reconnect is required.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Level shown on start-up.
    pub default_level: Level,
    /// Levels offered for selection.
    pub levels: Vec<Level>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_level: 1,
            levels: vec![1, 2, 3, 4],
        }
    }
}

/// Location of the snapshot cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Override for the cache directory.
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Configured directory, or `~/.cache/timetable-console`.
    pub fn root(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }
}

/// Login material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Pre-issued bearer token.
    pub access_token: String,
    /// Refresh token paired with `access_token`.
    pub refresh_token: Option<String>,
    /// Username for `Authentications/login`.
    pub username: String,
    /// Password for `Authentications/login`.
    pub password: String,
}

impl AuthConfig {
    /// Configured token, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        let credentials = Credentials {
            access_token: self.access_token.trim().to_string(),
            refresh_token: self.refresh_token.clone().filter(|token| !token.is_empty()),
        };
        credentials.is_present().then_some(credentials)
    }

    /// Username/password pair when both are set.
    pub fn login(&self) -> Option<(&str, &str)> {
        let username = self.username.trim();
        (!username.is_empty() && !self.password.is_empty())
            .then_some((username, self.password.as_str()))
    }
}

impl AppConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load from an explicit file (missing file is fine) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("TIMETABLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }
}

/// Path of the configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

/// Write the commented default configuration when none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    write_default_config(&path)?;
    Ok(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write default config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_file_matches_builtin_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join(CONFIG_FILE);
        write_default_config(&path)?;
        assert!(path.exists());

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.hub.path, "TimeTableHub");
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.session.levels, vec![1, 2, 3, 4]);
        assert!(config.auth.credentials().is_none());
        assert!(config.auth.login().is_none());
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[retry]\nmax_attempts = 8\n\n[auth]\naccess_token = \"abc\"\n",
        )?;

        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.hub.keepalive_interval(), Duration::from_secs(15));
        assert_eq!(config.hub.server_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.auth.credentials().map(|c| c.access_token),
            Some("abc".to_string())
        );
        Ok(())
    }

    #[test]
    fn existing_file_is_not_overwritten() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[session]\ndefault_level = 3\n")?;
        write_default_config(&path)?;
        assert_eq!(AppConfig::load_from(&path)?.session.default_level, 3);
        Ok(())
    }

    #[test]
    fn server_timeout_outlasts_two_keepalives() {
        let hub = HubConfig {
            keepalive_interval_secs: 20,
            server_timeout_secs: 10,
            ..HubConfig::default()
        };
        assert_eq!(hub.server_timeout(), Duration::from_secs(40));
    }
}
