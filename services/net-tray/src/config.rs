//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The account password is loaded from NET_TRAY_PASSWORD, password_file or
//! the OS keyring, never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use probe::Credentials;
use reconciler::Intervals;
use serde::Deserialize;

use crate::keyring_store::{KeyringStore, PasswordStore};

/// Env var holding the account password
const PASSWORD_ENV: &str = "NET_TRAY_PASSWORD";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    pub probe: ProbeConfig,
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

/// Campus account. Without a username only the link status is tracked.
#[derive(Debug, Default, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to NET_TRAY_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

/// Refresh cadence and the auto-manage toggle
#[derive(Debug, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub auto_manage: bool,
    #[serde(default = "default_status_interval")]
    pub status_update_interval_ms: u64,
    #[serde(default = "default_info_interval")]
    pub info_update_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            auto_manage: false,
            status_update_interval_ms: default_status_interval(),
            info_update_interval_ms: default_info_interval(),
        }
    }
}

/// Authentication gateway endpoint
#[derive(Debug, Deserialize)]
pub struct ProbeConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Local status surface (/health, /state, /menu, /metrics)
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_status_interval() -> u64 {
    30_000
}

fn default_info_interval() -> u64 {
    300_000
}

fn default_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. NET_TRAY_PASSWORD env var
    /// 2. password_file path from config
    /// 3. OS keyring entry for the username
    pub fn load(path: &Path) -> common::Result<Self> {
        Self::load_with(path, &KeyringStore)
    }

    /// `load` with an explicit password store for the keyring step.
    pub fn load_with(path: &Path, store: &dyn PasswordStore) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        // Blank usernames mean "no account"
        if config
            .account
            .username
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            config.account.username = None;
        }

        if !config.probe.base_url.starts_with("http://")
            && !config.probe.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.probe.base_url
            )));
        }

        if config.probe.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.polling.status_update_interval_ms == 0 {
            return Err(common::Error::Config(
                "status_update_interval_ms must be greater than 0".into(),
            ));
        }

        if config.polling.info_update_interval_ms == 0 {
            return Err(common::Error::Config(
                "info_update_interval_ms must be greater than 0".into(),
            ));
        }

        if let Some(http) = &config.http {
            if http.max_connections == 0 {
                return Err(common::Error::Config(
                    "max_connections must be greater than 0".into(),
                ));
            }
        }

        // Resolve password: env var takes precedence over file
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.account.password = Secret::from_trimmed(&password);
        } else if let Some(ref password_file) = config.account.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            config.account.password = Secret::from_trimmed(&password);
        }

        if config.account.password.is_none() {
            if let Some(username) = &config.account.username {
                config.account.password = store.password(username)?;
            }
        }

        if config.account.username.is_some() && config.account.password.is_none() {
            return Err(common::Error::Config(format!(
                "username is set but no password was found (set {PASSWORD_ENV}, password_file or a keyring entry)"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or NET_TRAY_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("NET_TRAY_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("net-tray.toml")
    }

    /// Credentials for the configured account, if complete.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.account.username.as_ref()?;
        let password = self.account.password.as_ref()?;
        Some(Credentials::new(username.clone(), password.clone()))
    }

    pub fn intervals(&self) -> Intervals {
        Intervals {
            status: Duration::from_millis(self.polling.status_update_interval_ms),
            info: Duration::from_millis(self.polling.info_update_interval_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    /// Persist the user's auto-manage toggle into the config file.
    ///
    /// Only `polling.auto_manage` changes; other keys are carried over as
    /// parsed (comments are not preserved). Written to a temp file in the same
    /// directory and renamed over the original.
    pub fn save_auto_manage(path: &Path, enabled: bool) -> common::Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let mut table: toml::Table = toml::from_str(&contents)?;

        let polling = table
            .entry("polling")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let Some(polling) = polling.as_table_mut() else {
            return Err(common::Error::Config("polling must be a table".into()));
        };
        polling.insert("auto_manage".into(), toml::Value::Boolean(enabled));

        let rendered = toml::to_string(&table)?;
        write_atomic(path, &rendered)
    }
}

/// Write to a temp file beside `path`, then rename it over `path`. The temp
/// file is removed if either step fails.
fn write_atomic(path: &Path, contents: &str) -> common::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".net-tray.toml.tmp.{}", std::process::id()));
    let result =
        std::fs::write(&tmp_path, contents).and_then(|()| std::fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result.map_err(common::Error::from)
}
