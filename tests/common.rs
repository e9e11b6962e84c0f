//! Shared helpers for keeper integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keeper::config::EcosystemConfig;
use keeper::daemon::process::MemoryProbe;
use keeper::daemon::{Supervisor, SupervisorSettings};
use keeper::Directive;
use parking_lot::Mutex;

/// Settings with short intervals so tests finish quickly.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        memory_check_interval: Duration::from_millis(100),
        watch_debounce: Duration::from_millis(100),
    }
}

/// Write `body` as `run.sh` inside `dir`.
pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("run.sh");
    std::fs::write(&path, body).unwrap();
    path
}

/// Write `doc` as `ecosystem.toml` inside `dir`.
pub fn write_ecosystem(dir: &Path, doc: &str) -> PathBuf {
    let path = dir.join("ecosystem.toml");
    std::fs::write(&path, doc).unwrap();
    path
}

/// Resolve `doc` against `dir`, with default logs under `dir/logs`.
pub fn directives(dir: &Path, doc: &str) -> Vec<Directive> {
    EcosystemConfig::parse(doc, Path::new("ecosystem.toml"))
        .unwrap()
        .resolve(dir, &dir.join("logs"))
        .unwrap()
        .0
}

/// Memory probe that replays readings, repeating the last one forever.
pub struct ScriptedProbe {
    readings: Mutex<Vec<u64>>,
}

impl ScriptedProbe {
    pub fn new(readings: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings),
        })
    }
}

impl MemoryProbe for ScriptedProbe {
    fn resident_bytes(&self, _pid: u32) -> Option<u64> {
        let mut readings = self.readings.lock();
        if readings.len() > 1 {
            Some(readings.remove(0))
        } else {
            readings.first().copied()
        }
    }
}

/// Run a supervisor over `directives` until every monitor finishes on its own.
pub async fn run_to_completion(supervisor: &mut Supervisor, directives: Vec<Directive>) {
    supervisor.start(directives).await;
    tokio::time::timeout(Duration::from_secs(20), supervisor.wait())
        .await
        .expect("monitors did not finish in time");
}
