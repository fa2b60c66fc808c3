//! Container engine control plane.
//!
//! The engine is driven through its CLI (`docker` or `podman`); every
//! invocation runs under a bounded timeout so a hung engine surfaces as an
//! error instead of stalling the caller.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::error::{ContainerError, ContainerResult};

/// Operations the lifecycle manager needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether a container with exactly this name exists (in any state).
    async fn exists(&self, name: &str) -> ContainerResult<bool>;

    /// Whether the named container is currently running.
    async fn is_running(&self, name: &str) -> ContainerResult<bool>;

    /// Create and start a new sandbox with the project directory mounted
    /// at `/workspace`, kept alive by a long-lived no-op entry process.
    async fn create(&self, name: &str, host_dir: &Path) -> ContainerResult<()>;

    /// Start a previously created, stopped container.
    async fn start(&self, name: &str) -> ContainerResult<()>;

    /// Stop a running container.
    async fn stop(&self, name: &str) -> ContainerResult<()>;

    /// Force-remove a container regardless of state.
    async fn remove(&self, name: &str) -> ContainerResult<()>;

    /// Run a command inside the container and capture combined output.
    async fn exec_capture(&self, name: &str, cmd: &[&str]) -> ContainerResult<String>;
}

/// Engine implementation shelling out to the configured CLI binary.
pub struct CliEngine {
    binary: String,
    image: String,
    timeout: Duration,
}

impl CliEngine {
    pub fn new(
        binary: impl Into<String>,
        image: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            image: image.into(),
            timeout,
        }
    }

    /// The engine binary, for callers that build `exec` argv themselves.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, args: &[&str]) -> ContainerResult<String> {
        let rendered = format!("{} {}", self.binary, args.join(" "));
        debug!("engine: {rendered}");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ContainerError::Timeout {
                command: rendered.clone(),
            })??;

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: rendered,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn exists(&self, name: &str) -> ContainerResult<bool> {
        // Anchored filter plus exact comparison: never act on a container
        // that merely shares a prefix with ours.
        let filter = format!("name=^/{name}$");
        let out = self
            .run(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        Ok(out.lines().any(|line| line.trim() == name))
    }

    async fn is_running(&self, name: &str) -> ContainerResult<bool> {
        match self
            .run(&["inspect", "-f", "{{.State.Running}}", name])
            .await
        {
            Ok(out) => Ok(out.trim() == "true"),
            // inspect on a missing container exits non-zero
            Err(ContainerError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, name: &str, host_dir: &Path) -> ContainerResult<()> {
        let volume = format!("{}:/workspace", host_dir.display());
        self.run(&[
            "run",
            "-d",
            "--name",
            name,
            "-v",
            &volume,
            "-w",
            "/workspace",
            &self.image,
            "sleep",
            "infinity",
        ])
        .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> ContainerResult<()> {
        self.run(&["start", name]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ContainerResult<()> {
        self.run(&["stop", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> ContainerResult<()> {
        self.run(&["rm", "-f", name]).await?;
        Ok(())
    }

    async fn exec_capture(&self, name: &str, cmd: &[&str]) -> ContainerResult<String> {
        let mut args = vec!["exec", name];
        args.extend_from_slice(cmd);
        self.run(&args).await
    }
}
