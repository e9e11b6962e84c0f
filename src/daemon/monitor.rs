//! Per-instance supervision loop.
//!
//! One [`InstanceMonitor`] task owns one instance for the lifetime of a load.
//! Each pass spawns the child, captures its output and waits for the first
//! of: child exit, memory limit breach, watch restart, or shutdown. Exits are
//! fed to a [`CrashTracker`] which decides whether to respawn.
//!
//! The monitor is the only writer of its instance's registry entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Directive;
use crate::constants::PUMP_DRAIN_TIMEOUT_MS;
use crate::daemon::process::{
    LogSinks, MemoryProbe, SpawnConfig, pump_lines, spawn_instance, stop_instance,
    terminate_orphans,
};
use crate::daemon::registry::{ProcessState, Registry};
use crate::error::Error;
use crate::reliability::{CrashTracker, ExitKind, RestartDecision};
use crate::utils::format_bytes;

/// Why a forced restart happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForcedReason {
    Memory,
    FileChange,
}

impl ForcedReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory limit",
            Self::FileChange => "file change",
        }
    }
}

/// How a single run ended.
#[derive(Debug)]
enum RunOutcome {
    Exited { exit: ExitKind, uptime: Duration },
    Forced(ForcedReason),
    Shutdown,
}

/// Supervises one instance of a directive.
pub struct InstanceMonitor {
    directive: Arc<Directive>,
    instance: u32,
    registry: Registry,
    sinks: Arc<LogSinks>,
    probe: Arc<dyn MemoryProbe>,
    memory_interval: Duration,
    shutdown: watch::Receiver<bool>,
    forced: Option<broadcast::Receiver<()>>,
}

impl InstanceMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directive: Arc<Directive>,
        instance: u32,
        registry: Registry,
        sinks: Arc<LogSinks>,
        probe: Arc<dyn MemoryProbe>,
        memory_interval: Duration,
        shutdown: watch::Receiver<bool>,
        forced: Option<broadcast::Receiver<()>>,
    ) -> Self {
        Self {
            directive,
            instance,
            registry,
            sinks,
            probe,
            memory_interval,
            shutdown,
            forced,
        }
    }

    /// Run until shutdown, a final stop, or the crash loop gives up.
    ///
    /// Returns the instance's final state.
    pub async fn run(mut self) -> ProcessState {
        let mut tracker = CrashTracker::new(self.directive.restart_policy());

        loop {
            if *self.shutdown.borrow() {
                return self.finish(ProcessState::Stopped);
            }

            self.set_state(ProcessState::Starting);

            match self.run_once().await {
                RunOutcome::Shutdown => return self.finish(ProcessState::Stopped),
                RunOutcome::Forced(reason) => {
                    tracker.record_forced_restart();
                    info!(
                        name = %self.directive.name,
                        instance = self.instance,
                        reason = reason.as_str(),
                        "Restarting instance"
                    );
                    self.registry.update(&self.directive.name, self.instance, |status| {
                        status.state = ProcessState::Restarting;
                        status.pid = None;
                        status.restarts += 1;
                        status.forced_restarts += 1;
                        status.last_exit = Some(format!("restarted: {}", reason.as_str()));
                    });
                },
                RunOutcome::Exited { exit, uptime } => {
                    let decision = tracker.record_exit(&exit, uptime);
                    let state = self.exit_state(&exit);

                    self.registry.update(&self.directive.name, self.instance, |status| {
                        status.state = state;
                        status.pid = None;
                        status.consecutive_crashes = tracker.consecutive_crashes();
                        status.last_exit = Some(exit.to_string());
                    });

                    if state == ProcessState::Crashed {
                        warn!(
                            name = %self.directive.name,
                            instance = self.instance,
                            exit = %exit,
                            uptime_ms = uptime.as_millis() as u64,
                            crashes = tracker.consecutive_crashes(),
                            "Instance crashed"
                        );
                    }

                    match decision {
                        RestartDecision::Restart { delay } => {
                            info!(
                                name = %self.directive.name,
                                instance = self.instance,
                                exit = %exit,
                                delay_ms = delay.as_millis() as u64,
                                "Restarting instance"
                            );
                            if !self.wait_restart_delay(delay).await {
                                return self.finish(ProcessState::Stopped);
                            }
                            self.registry.update(&self.directive.name, self.instance, |status| {
                                status.state = ProcessState::Restarting;
                                status.restarts += 1;
                            });
                        },
                        RestartDecision::Stop => {
                            info!(
                                name = %self.directive.name,
                                instance = self.instance,
                                exit = %exit,
                                state = %state,
                                "Instance exited, not restarting"
                            );
                            return state;
                        },
                        RestartDecision::GiveUp { crashes } => {
                            let err = Error::CrashLoopExhausted {
                                name: self.directive.name.clone(),
                                instance: self.instance,
                                crashes,
                            };
                            error!(error = %err, last_exit = %exit, "Giving up on instance");
                            return self.finish(ProcessState::GivenUp);
                        },
                    }
                },
            }
        }
    }

    /// Spawn once and wait for the run to end.
    async fn run_once(&mut self) -> RunOutcome {
        let spawn = SpawnConfig::for_instance(&self.directive, self.instance);
        let started = Instant::now();

        let mut child = match spawn_instance(&spawn) {
            Ok(child) => child,
            Err(err) => {
                warn!(instance = self.instance, error = %err, "Instance failed to start");
                return RunOutcome::Exited {
                    exit: ExitKind::SpawnFailed(err.to_string()),
                    uptime: Duration::ZERO,
                };
            },
        };

        let pid = child.id();
        self.registry.update(&self.directive.name, self.instance, |status| {
            status.state = ProcessState::Running;
            status.pid = pid;
            status.launches += 1;
            status.started_at = Some(Utc::now());
        });
        info!(name = %self.directive.name, instance = self.instance, pid, "Instance running");

        let pumps = self.start_pumps(&mut child).await;
        let outcome = self.wait_for_end(&mut child, pid, started).await;

        match outcome {
            RunOutcome::Exited { .. } => {
                // Background jobs of the exited child would outlive it.
                if let Some(pid) = pid {
                    terminate_orphans(pid);
                }
            },
            _ => {
                if let Err(e) = stop_instance(&mut child, self.directive.kill_timeout).await {
                    warn!(name = %self.directive.name, instance = self.instance, error = %e, "Failed to stop instance");
                }
            },
        }

        drain_pumps(pumps).await;
        outcome
    }

    async fn wait_for_end(&mut self, child: &mut Child, pid: Option<u32>, started: Instant) -> RunOutcome {
        let mut memory_tick = self.memory_interval();

        loop {
            tokio::select! {
                status = child.wait() => {
                    let exit = match status {
                        Ok(status) => ExitKind::from_status(status),
                        Err(e) => {
                            warn!(instance = self.instance, error = %e, "Lost track of instance");
                            ExitKind::Code(-1)
                        },
                    };
                    return RunOutcome::Exited { exit, uptime: started.elapsed() };
                },
                () = next_tick(&mut memory_tick) => {
                    if let Some(pid) = pid
                        && self.memory_exceeded(pid).await
                    {
                        return RunOutcome::Forced(ForcedReason::Memory);
                    }
                },
                changed = next_forced(&mut self.forced) => {
                    if changed {
                        return RunOutcome::Forced(ForcedReason::FileChange);
                    }
                    self.forced = None;
                },
                changed = self.shutdown.changed() => {
                    // A dropped sender means the supervisor is gone.
                    if changed.is_err() || *self.shutdown.borrow() {
                        return RunOutcome::Shutdown;
                    }
                },
            }
        }
    }

    fn memory_interval(&self) -> Option<Interval> {
        self.directive.max_memory_restart?;
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.memory_interval, self.memory_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    async fn memory_exceeded(&self, pid: u32) -> bool {
        let Some(limit) = self.directive.max_memory_restart else {
            return false;
        };

        let probe = Arc::clone(&self.probe);
        let rss = match tokio::task::spawn_blocking(move || probe.resident_bytes(pid)).await {
            Ok(Some(rss)) => rss,
            Ok(None) => return false,
            Err(e) => {
                debug!(pid, error = %e, "Memory sample failed");
                return false;
            },
        };

        debug!(name = %self.directive.name, instance = self.instance, rss = %format_bytes(rss), "Memory sample");
        if rss <= limit {
            return false;
        }

        let err = Error::MemoryLimitExceeded {
            name: self.directive.name.clone(),
            instance: self.instance,
            rss,
            limit,
        };
        warn!(error = %err, "Memory limit exceeded, restarting instance");
        true
    }

    async fn start_pumps(&self, child: &mut Child) -> Vec<JoinHandle<u64>> {
        let paths = self.directive.log_paths(self.instance);
        let format = self.directive.log_date_format.clone();
        let mut pumps = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            pumps.push(self.pump(stdout, &paths.out, format.clone()).await);
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(self.pump(stderr, &paths.error, format).await);
        }
        pumps
    }

    async fn pump<R>(
        &self,
        reader: R,
        path: &std::path::Path,
        format: Option<crate::date_format::LogDateFormat>,
    ) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        match self.sinks.get(path).await {
            Ok(sink) => tokio::spawn(pump_lines(reader, sink, format)),
            Err(e) => {
                warn!(name = %self.directive.name, error = %e, "Discarding instance output");
                tokio::spawn(async move {
                    let mut reader = reader;
                    tokio::io::copy(&mut reader, &mut tokio::io::sink())
                        .await
                        .unwrap_or(0);
                    0
                })
            },
        }
    }

    /// Sleep out the restart delay. Returns false if shutdown arrived first.
    async fn wait_restart_delay(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !*self.shutdown.borrow();
        }

        tokio::select! {
            () = tokio::time::sleep(delay) => !*self.shutdown.borrow(),
            changed = self.shutdown.changed() => changed.is_ok() && !*self.shutdown.borrow(),
        }
    }

    fn exit_state(&self, exit: &ExitKind) -> ProcessState {
        match exit {
            ExitKind::Code(code) if self.directive.stop_exit_codes.contains(code) => {
                ProcessState::Stopped
            },
            exit if exit.is_crash() => ProcessState::Crashed,
            _ => ProcessState::Stopped,
        }
    }

    fn set_state(&self, state: ProcessState) {
        self.registry.set_state(&self.directive.name, self.instance, state);
    }

    fn finish(&self, state: ProcessState) -> ProcessState {
        self.set_state(state);
        debug!(name = %self.directive.name, instance = self.instance, state = %state, "Monitor finished");
        state
    }
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}

/// Wait for a watch restart. Returns false once the channel is gone.
async fn next_forced(forced: &mut Option<broadcast::Receiver<()>>) -> bool {
    let Some(rx) = forced else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
        Err(broadcast::error::RecvError::Closed) => false,
    }
}

/// Let output pumps finish. Grandchildren may hold the pipes open, so give up
/// after a bounded wait.
async fn drain_pumps(pumps: Vec<JoinHandle<u64>>) {
    let deadline = Duration::from_millis(PUMP_DRAIN_TIMEOUT_MS);
    for mut pump in pumps {
        if tokio::time::timeout(deadline, &mut pump).await.is_err() {
            debug!("Output pump still busy, detaching");
            pump.abort();
        }
    }
}
