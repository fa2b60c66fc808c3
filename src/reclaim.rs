//! Idle sandbox reclamation.
//!
//! A single periodic task sweeps the activity tracker and stops containers
//! whose identity has been inactive past the idle limit. This is the only
//! place a container is stopped for inactivity; session teardown never stops
//! the sandbox because other sessions for the same identity may be attached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::activity::ActivityTracker;
use crate::container::ContainerManager;

pub struct IdleReclaimer {
    manager: Arc<ContainerManager>,
    tracker: Arc<ActivityTracker>,
    idle_limit: Duration,
    sweep_interval: Duration,
}

impl IdleReclaimer {
    pub fn new(
        manager: Arc<ContainerManager>,
        tracker: Arc<ActivityTracker>,
        idle_limit: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            manager,
            tracker,
            idle_limit,
            sweep_interval,
        }
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One reclamation pass.
    pub async fn sweep(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let snapshot = self.tracker.snapshot();
        let stale = idle_identities(&snapshot, now, self.idle_limit);

        if stale.is_empty() {
            debug!("reclaim sweep: {} tracked, none idle", snapshot.len());
            return;
        }

        for identity in stale {
            info!("stopping idle sandbox for {identity}");
            match self.manager.stop(&identity).await {
                Ok(()) => self.tracker.remove(&identity),
                // Leave the record in place so the next sweep retries;
                // one misbehaving sandbox must not block the loop.
                Err(err) => warn!("failed to stop idle sandbox for {identity}: {err}"),
            }
        }
    }
}

/// Identities whose last activity is older than the idle limit.
fn idle_identities(
    snapshot: &HashMap<String, i64>,
    now_millis: i64,
    idle_limit: Duration,
) -> Vec<String> {
    let limit_millis = idle_limit.as_millis() as i64;
    snapshot
        .iter()
        .filter(|&(_, &last)| now_millis - last > limit_millis)
        .map(|(identity, _)| identity.clone())
        .collect()
}
