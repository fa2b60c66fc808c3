//! Application state shared across handlers.

use std::sync::Arc;

use crate::activity::ActivityTracker;
use crate::auth::{TokenVerifier, WorkspaceResolver};
use crate::config::{BridgeConfig, ServerConfig};
use crate::container::{CliEngine, ContainerEngine, ContainerManager};
use crate::session::templates::RunCommandTable;

/// Everything a connection handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ContainerManager>,
    pub tracker: Arc<ActivityTracker>,
    pub engine: Arc<dyn ContainerEngine>,
    /// CLI binary name for processes attached directly through a pty.
    pub engine_binary: String,
    pub templates: Arc<RunCommandTable>,
    pub verifier: Arc<TokenVerifier>,
    pub resolver: Arc<WorkspaceResolver>,
    pub bridge: BridgeConfig,
}

impl AppState {
    /// Wires the full service graph from loaded configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        let engine: Arc<dyn ContainerEngine> = Arc::new(CliEngine::new(
            &config.sandbox.engine,
            &config.sandbox.image,
            config.sandbox.command_timeout(),
        ));
        let manager = Arc::new(ContainerManager::new(engine.clone()));

        Self {
            manager,
            tracker: Arc::new(ActivityTracker::new()),
            engine,
            engine_binary: config.sandbox.engine.clone(),
            templates: Arc::new(RunCommandTable::new(&config.templates)),
            verifier: Arc::new(TokenVerifier::new(&config.auth.secret)),
            resolver: Arc::new(WorkspaceResolver::new(config.sandbox.projects_root.clone())),
            bridge: config.bridge,
        }
    }
}
