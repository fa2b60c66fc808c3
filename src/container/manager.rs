//! Sandbox lifecycle manager.
//!
//! Guarantees at most one engine-level mutation in flight per identity by
//! funneling ensure/stop/remove through a per-identity lock. Unrelated
//! identities never block on each other's container startup.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use log::info;
use tokio::sync::Mutex;

use super::engine::ContainerEngine;
use super::error::ContainerResult;
use super::{container_name, validate_identity};

/// Ensures exactly one named sandbox container exists and is running for a
/// given identity; stops or removes it on request.
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ensure the identity's sandbox exists and is running, with `host_dir`
    /// (created if missing) bind-mounted as its workspace. Idempotent.
    pub async fn ensure_running(&self, identity: &str, host_dir: &Path) -> ContainerResult<()> {
        validate_identity(identity)?;
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let name = container_name(identity);

        if self.engine.exists(&name).await? {
            if !self.engine.is_running(&name).await? {
                info!("starting existing sandbox {name}");
                self.engine.start(&name).await?;
            }
            return Ok(());
        }

        tokio::fs::create_dir_all(host_dir).await?;

        info!("creating sandbox {name}");
        self.engine.create(&name, host_dir).await
    }

    /// Stop the identity's sandbox. No-op if absent or already stopped.
    pub async fn stop(&self, identity: &str) -> ContainerResult<()> {
        validate_identity(identity)?;
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let name = container_name(identity);

        if !self.engine.exists(&name).await? {
            return Ok(());
        }
        if self.engine.is_running(&name).await? {
            info!("stopping sandbox {name}");
            self.engine.stop(&name).await?;
        }
        Ok(())
    }

    /// Force-remove the identity's sandbox regardless of state. Not used by
    /// the idle reclamation path.
    pub async fn remove(&self, identity: &str) -> ContainerResult<()> {
        validate_identity(identity)?;
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let name = container_name(identity);

        if self.engine.exists(&name).await? {
            info!("removing sandbox {name}");
            self.engine.remove(&name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recording engine fake: tracks container state in memory and counts
    /// mutations, failing the test if two creates for one name overlap.
    #[derive(Default)]
    struct FakeEngine {
        existing: StdMutex<HashSet<String>>,
        running: StdMutex<HashSet<String>>,
        creates: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        in_create: AtomicUsize,
        fail_stop: StdMutex<HashSet<String>>,
        mounted: StdMutex<Vec<std::path::PathBuf>>,
    }

    impl FakeEngine {
        fn mutation_count(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
                + self.starts.load(Ordering::SeqCst)
                + self.stops.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn exists(&self, name: &str) -> ContainerResult<bool> {
            Ok(self.existing.lock().unwrap().contains(name))
        }

        async fn is_running(&self, name: &str) -> ContainerResult<bool> {
            Ok(self.running.lock().unwrap().contains(name))
        }

        async fn create(&self, name: &str, host_dir: &Path) -> ContainerResult<()> {
            let overlapping = self.in_create.fetch_add(1, Ordering::SeqCst);
            assert_eq!(overlapping, 0, "concurrent create for {name}");

            // hold the "engine" busy long enough for racing callers to pile up
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;

            self.mounted.lock().unwrap().push(host_dir.to_path_buf());
            self.existing.lock().unwrap().insert(name.to_string());
            self.running.lock().unwrap().insert(name.to_string());
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.in_create.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn start(&self, name: &str) -> ContainerResult<()> {
            self.running.lock().unwrap().insert(name.to_string());
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, name: &str) -> ContainerResult<()> {
            if self.fail_stop.lock().unwrap().contains(name) {
                return Err(ContainerError::CommandFailed {
                    command: format!("stop {name}"),
                    message: "boom".to_string(),
                });
            }
            self.running.lock().unwrap().remove(name);
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove(&self, name: &str) -> ContainerResult<()> {
            self.existing.lock().unwrap().remove(name);
            self.running.lock().unwrap().remove(name);
            Ok(())
        }

        async fn exec_capture(&self, _name: &str, _cmd: &[&str]) -> ContainerResult<String> {
            Ok(String::new())
        }
    }

    fn manager_with(engine: Arc<FakeEngine>) -> (ContainerManager, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        (ContainerManager::new(engine), dir.keep())
    }

    #[tokio::test]
    async fn ensure_running_creates_once_under_concurrency() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine.clone());
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let workspace = root.join("user1");
            handles.push(tokio::spawn(async move {
                manager.ensure_running("user1", &workspace).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_running_is_idempotent_when_running() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine.clone());
        let workspace = root.join("user1");

        manager.ensure_running("user1", &workspace).await.unwrap();
        let mutations = engine.mutation_count();

        manager.ensure_running("user1", &workspace).await.unwrap();
        assert_eq!(engine.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn ensure_running_starts_stopped_container() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine.clone());
        let workspace = root.join("user1");

        manager.ensure_running("user1", &workspace).await.unwrap();
        manager.stop("user1").await.unwrap();
        assert!(!engine.is_running("playbox-user1").await.unwrap());

        manager.ensure_running("user1", &workspace).await.unwrap();
        assert!(engine.is_running("playbox-user1").await.unwrap());
        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_running_mounts_the_given_workspace() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine.clone());
        let workspace = root.join("user1");

        manager.ensure_running("user1", &workspace).await.unwrap();

        // the caller-supplied directory is created and handed to the engine
        assert!(workspace.is_dir());
        assert_eq!(*engine.mounted.lock().unwrap(), vec![workspace]);
    }

    #[tokio::test]
    async fn stop_is_noop_for_absent_container() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, _root) = manager_with(engine.clone());

        manager.stop("ghost").await.unwrap();
        assert_eq!(engine.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine.clone());

        manager.ensure_running("user1", &root.join("user1")).await.unwrap();
        manager.remove("user1").await.unwrap();
        manager.remove("user1").await.unwrap();
        assert!(!engine.exists("playbox-user1").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_unsafe_identity() {
        let engine = Arc::new(FakeEngine::default());
        let (manager, root) = manager_with(engine);

        let err = manager
            .ensure_running("../escape", &root.join("escape"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidIdentity(_)));
    }
}
