//! In-memory table of managed directives and their instances.
//!
//! The registry is owned by the [`Supervisor`](super::supervisor::Supervisor)
//! and lives exactly as long as it does. Monitors hold cheap clones to publish
//! state changes; a reload replaces the whole table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Directive;

/// Supervision state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// About to spawn.
    Starting,
    /// Child is alive.
    Running,
    /// Child died with a non-zero status, a signal, or failed to spawn.
    Crashed,
    /// Child exited cleanly or was stopped by keeper.
    Stopped,
    /// Waiting out the restart delay, or being restarted after a forced stop.
    Restarting,
    /// Crash loop exhausted. Terminal.
    GivenUp,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Stopped => "stopped",
            Self::Restarting => "restarting",
            Self::GivenUp => "given up",
        };
        f.write_str(label)
    }
}

/// Published status of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance: u32,
    pub state: ProcessState,
    pub pid: Option<u32>,
    /// Successful spawns so far.
    pub launches: u32,
    /// Restarts so far, crash-driven and forced.
    pub restarts: u32,
    /// Forced restarts (memory limit, watch).
    pub forced_restarts: u32,
    pub consecutive_crashes: u32,
    pub last_exit: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl InstanceStatus {
    fn new(instance: u32) -> Self {
        Self {
            instance,
            state: ProcessState::Starting,
            pid: None,
            launches: 0,
            restarts: 0,
            forced_restarts: 0,
            consecutive_crashes: 0,
            last_exit: None,
            started_at: None,
        }
    }
}

/// Registry of managed directives keyed by name.
#[derive(Clone, Default)]
pub struct Registry {
    apps: Arc<RwLock<BTreeMap<String, Vec<InstanceStatus>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `directive`, replacing any previous entry with the same name.
    pub fn insert(&self, directive: &Directive) {
        let instances = (0..directive.instances).map(InstanceStatus::new).collect();
        self.apps.write().insert(directive.name.clone(), instances);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.apps.write().clear();
    }

    /// Registered directive names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.apps.read().keys().cloned().collect()
    }

    /// Number of registered directives.
    pub fn directive_count(&self) -> usize {
        self.apps.read().len()
    }

    /// Status of one instance.
    pub fn status(&self, name: &str, instance: u32) -> Option<InstanceStatus> {
        self.apps
            .read()
            .get(name)?
            .get(instance as usize)
            .cloned()
    }

    /// Apply `update` to one instance's status. Returns false if it is unknown.
    pub fn update<F>(&self, name: &str, instance: u32, update: F) -> bool
    where
        F: FnOnce(&mut InstanceStatus),
    {
        let mut apps = self.apps.write();
        match apps
            .get_mut(name)
            .and_then(|instances| instances.get_mut(instance as usize))
        {
            Some(status) => {
                update(status);
                true
            },
            None => false,
        }
    }

    /// Set the state of one instance.
    pub fn set_state(&self, name: &str, instance: u32, state: ProcessState) -> bool {
        self.update(name, instance, |status| {
            status.state = state;
            if !matches!(state, ProcessState::Running) {
                status.pid = None;
            }
        })
    }

    /// Count instances currently in `state` across all directives.
    pub fn count_in_state(&self, state: ProcessState) -> usize {
        self.apps
            .read()
            .values()
            .flatten()
            .filter(|status| status.state == state)
            .count()
    }
}
