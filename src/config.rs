//! Server configuration.
//!
//! Settings come from a TOML file (default `playbox.toml`) layered with
//! `PLAYBOX_`-prefixed environment variables, e.g. `PLAYBOX_SANDBOX__IMAGE`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: String,

    /// Authentication settings.
    pub auth: AuthConfig,

    /// Sandbox / container engine settings.
    pub sandbox: SandboxConfig,

    /// Session bridging knobs.
    pub bridge: BridgeConfig,

    /// Extra run-command templates, merged over the built-ins.
    pub templates: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            auth: AuthConfig::default(),
            sandbox: SandboxConfig::default(),
            bridge: BridgeConfig::default(),
            templates: HashMap::new(),
        }
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for access token verification.
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

/// Container engine and reclamation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container engine binary ("docker" or "podman").
    pub engine: String,

    /// Image used for project sandboxes.
    pub image: String,

    /// Host directory holding per-identity project directories.
    pub projects_root: PathBuf,

    /// Bounded wait for any single engine command.
    pub command_timeout_secs: u64,

    /// Inactivity duration after which a sandbox is stopped.
    pub idle_limit_secs: u64,

    /// Delay between idle reclamation sweeps.
    pub gc_interval_secs: u64,
}

impl SandboxConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.idle_limit_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            image: "playbox-runtime".to_string(),
            projects_root: PathBuf::from("/var/lib/playbox/projects"),
            command_timeout_secs: 30,
            idle_limit_secs: 600,
            gc_interval_secs: 60,
        }
    }
}

/// Session bridging knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interval between output buffer flushes to the client.
    pub flush_interval_ms: u64,

    /// Settle delay before a pending resize is applied.
    pub resize_debounce_ms: u64,

    /// Delay before probing the sandbox for a listening port (run sessions).
    pub port_probe_delay_ms: u64,
}

impl BridgeConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn port_probe_delay(&self) -> Duration {
        Duration::from_millis(self.port_probe_delay_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 16,
            resize_debounce_ms: 250,
            port_probe_delay_ms: 1500,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        } else {
            builder = builder.add_source(
                File::new("playbox.toml", FileFormat::Toml).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("PLAYBOX").separator("__"));

        let config = builder.build().context("building configuration")?;
        config
            .try_deserialize::<ServerConfig>()
            .context("deserializing configuration")
    }
}
