//! Memory sampling and log reading for supervised instances.
//!
//! Memory is measured across the whole process tree rooted at the instance's
//! pid, since the managed command is usually a wrapper script whose real work
//! happens in children.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Source of resident memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes used by `pid` and its descendants, or `None` if the
    /// process is gone.
    fn resident_bytes(&self, pid: u32) -> Option<u64>;
}

/// [`MemoryProbe`] backed by the system process table.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let root = Pid::from(pid as usize);
        let root_memory = system.process(root)?.memory();

        let descendants: u64 = system
            .processes()
            .iter()
            .filter(|(candidate, _)| **candidate != root && descends_from(&system, **candidate, root))
            .map(|(_, process)| process.memory())
            .sum();

        Some(root_memory + descendants)
    }
}

fn descends_from(system: &System, pid: Pid, root: Pid) -> bool {
    let mut current = system.process(pid).and_then(sysinfo::Process::parent);
    // Bounded walk guards against parent cycles from pid reuse.
    for _ in 0..64 {
        match current {
            Some(parent) if parent == root => return true,
            Some(parent) => current = system.process(parent).and_then(sysinfo::Process::parent),
            None => return false,
        }
    }
    false
}

/// Checks if a process with the given PID is currently running.
pub fn is_running(pid: u32) -> bool {
    let mut system = System::new();
    let target = Pid::from(pid as usize);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// Reads the last N lines from a log file.
///
/// Backs `keeper logs`.
pub fn tail_log(log_path: &Path, lines: usize) -> Result<Vec<String>> {
    let file = File::open(log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<_>>()
        .context("Failed to read log file")?;

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
