//! Server configuration
//!
//! Loaded from a TOML file. The path comes from the first command line
//! argument, then `TASKDECK_CONFIG`, then `taskdeck.toml` in the platform
//! config directory. A missing file means defaults.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:7331"
//! max_sessions = 256
//!
//! [storage]
//! database = "/var/lib/taskdeck/taskdeck.db"
//!
//! [[users]]
//! name = "Ada"
//! email = "ada@example.com"
//! role = "admin"
//! token = "change-me"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use taskdeck_core::Role;
use taskdeck_net::{ServerConfig, DEFAULT_PORT};

use crate::error::{Error, Result};

pub const CONFIG_ENV: &str = "TASKDECK_CONFIG";
pub const CONFIG_FILE: &str = "taskdeck.toml";
pub const DATABASE_FILE: &str = "taskdeck.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: SocketAddr,
    pub max_sessions: usize,
    pub persist_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_sessions: defaults.max_sessions,
            persist_timeout_ms: defaults.persist_timeout.as_millis() as u64,
            handshake_timeout_ms: defaults.handshake_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Defaults to `taskdeck.db` in the platform data directory
    pub database: Option<PathBuf>,
}

/// Account created on startup if its email is not registered yet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedUser {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub token: String,
}

fn default_role() -> Role {
    Role::Employee
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "taskdeck", "taskdeck")
}

/// Resolve which config file to read
pub fn locate(arg: Option<String>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let dirs = project_dirs().ok_or(Error::NoProjectDir("config"))?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

impl Config {
    /// Read and validate `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            Error::Parse { source, .. } => Error::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), users = config.users.len(), "Config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|source| Error::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Invalid("server.max_sessions must be at least 1".into()));
        }
        if self.server.persist_timeout_ms == 0 || self.server.handshake_timeout_ms == 0 {
            return Err(Error::Invalid("timeouts must be positive".into()));
        }

        let mut tokens = HashSet::new();
        let mut emails = HashSet::new();
        for user in &self.users {
            if user.name.trim().is_empty() || user.email.trim().is_empty() {
                return Err(Error::Invalid("users need a name and an email".into()));
            }
            if user.token.is_empty() {
                return Err(Error::Invalid(format!("user {} has an empty token", user.email)));
            }
            if !tokens.insert(user.token.as_str()) {
                return Err(Error::Invalid(format!("user {} reuses a token", user.email)));
            }
            if !emails.insert(user.email.to_lowercase()) {
                return Err(Error::Invalid(format!("duplicate user email {}", user.email)));
            }
        }
        Ok(())
    }

    /// Database file to open
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.database {
            return Ok(path.clone());
        }
        let dirs = project_dirs().ok_or(Error::NoProjectDir("data"))?;
        Ok(dirs.data_dir().join(DATABASE_FILE))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_sessions: self.server.max_sessions,
            handshake_timeout: Duration::from_millis(self.server.handshake_timeout_ms),
            persist_timeout: Duration::from_millis(self.server.persist_timeout_ms),
        }
    }
}
