//! Service configuration.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::session::{RegistrySettings, ShellSettings, default_slow_commands};
use crate::transport::{ConnectionSecurityOptions, SecurityLevel};

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub session: SessionSection,
    pub ssh: SshSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Serve simulated devices instead of dialing out.
    pub simulate: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            simulate: false,
        }
    }
}

/// Session timeouts and limits, in seconds unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub command_timeout_secs: u64,
    pub slow_command_timeout_secs: u64,
    /// Command prefixes that get `slow_command_timeout_secs`.
    pub slow_commands: Vec<String>,
    pub login_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    /// Commands kept per session.
    pub history_limit: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: 10,
            slow_command_timeout_secs: 60,
            slow_commands: default_slow_commands(),
            login_timeout_secs: 30,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
            reap_interval_secs: 30,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub security_level: SecurityLevel,
    /// Check server host keys against `~/.ssh/known_hosts`.
    pub verify_host_key: bool,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::Secure,
            verify_host_key: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or an `EnvFilter` directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NETGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("NETGATE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("NETGATE_PORT", port))?;
        }
        if let Some(secs) = lookup("NETGATE_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("NETGATE_IDLE_TIMEOUT_SECS", secs))?;
        }
        if let Some(level) = lookup("NETGATE_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.simulate {
            self.server.simulate = true;
        }
    }

    /// Load configuration with full priority chain.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make every session fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        let timeouts = [
            ("session.command_timeout_secs", session.command_timeout_secs),
            ("session.slow_command_timeout_secs", session.slow_command_timeout_secs),
            ("session.login_timeout_secs", session.login_timeout_secs),
            ("session.connect_timeout_secs", session.connect_timeout_secs),
            ("session.idle_timeout_secs", session.idle_timeout_secs),
            ("session.reap_interval_secs", session.reap_interval_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if session.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "session.history_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(self.server.host.clone(), self.server.port)
    }

    pub fn shell_settings(&self) -> ShellSettings {
        let session = &self.session;
        ShellSettings {
            command_timeout: Duration::from_secs(session.command_timeout_secs),
            slow_command_timeout: Duration::from_secs(session.slow_command_timeout_secs),
            slow_commands: session.slow_commands.clone(),
            login_timeout: Duration::from_secs(session.login_timeout_secs),
            history_limit: session.history_limit,
            ..ShellSettings::default()
        }
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            reap_interval: Duration::from_secs(self.session.reap_interval_secs),
            shell: Arc::new(self.shell_settings()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.session.connect_timeout_secs)
    }

    pub fn security_options(&self) -> ConnectionSecurityOptions {
        ConnectionSecurityOptions::from_settings(self.ssh.security_level, self.ssh.verify_host_key)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {0}: '{1}'")]
    InvalidEnv(&'static str, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
