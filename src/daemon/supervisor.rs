//! Supervisor: owns the registry and every instance monitor.
//!
//! # Lifecycle
//!
//! 1. [`Supervisor::start`] registers each directive, runs its `post_update`
//!    hooks, starts its file watcher and spawns one monitor per instance.
//! 2. [`Supervisor::run_until_signal`] waits for SIGINT/SIGTERM (shutdown) or
//!    SIGHUP (reload).
//! 3. [`Supervisor::shutdown`] flips the shutdown channel; every monitor stops
//!    its child and exits without restarting.
//!
//! A reload stops everything, replaces the registry wholesale and starts
//! again from step 1. A failed reload leaves the current directives running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Directive;
use crate::constants::{MEMORY_CHECK_INTERVAL_SECS, WATCH_DEBOUNCE_MS};
use crate::daemon::monitor::InstanceMonitor;
use crate::daemon::process::{
    LogSinks, MemoryProbe, SysinfoProbe, WatchHandle, run_post_update, watch_directive,
};
use crate::daemon::registry::{ProcessState, Registry};
use crate::error::Result;

/// Timing knobs. Defaults match production; tests shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Interval between resident memory samples.
    pub memory_check_interval: Duration,
    /// Quiet period before a watch restart fires.
    pub watch_debounce: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            memory_check_interval: Duration::from_secs(MEMORY_CHECK_INTERVAL_SECS),
            watch_debounce: Duration::from_millis(WATCH_DEBOUNCE_MS),
        }
    }
}

/// Final state reported by a finished monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorExit {
    pub name: String,
    pub instance: u32,
    pub state: ProcessState,
}

/// Control signal received by the supervisor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Shutdown,
    Reload,
}

/// Supervises a set of directives.
pub struct Supervisor {
    registry: Registry,
    sinks: Arc<LogSinks>,
    probe: Arc<dyn MemoryProbe>,
    settings: SupervisorSettings,
    shutdown_tx: watch::Sender<bool>,
    monitors: JoinSet<MonitorExit>,
    watchers: Vec<WatchHandle>,
}

impl Supervisor {
    /// Create a supervisor sampling memory from the system process table.
    pub fn new(settings: SupervisorSettings) -> Self {
        Self::with_probe(settings, Arc::new(SysinfoProbe::new()))
    }

    /// Create a supervisor with a custom memory source.
    pub fn with_probe(settings: SupervisorSettings, probe: Arc<dyn MemoryProbe>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: Registry::new(),
            sinks: Arc::new(LogSinks::new()),
            probe,
            settings,
            shutdown_tx,
            monitors: JoinSet::new(),
            watchers: Vec::new(),
        }
    }

    /// Handle to the live registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of monitors still running.
    pub fn running_monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Start supervising `directives`.
    ///
    /// Hooks run here, once per directive, before any of its instances is
    /// spawned. Hook and watcher failures are logged and never block startup.
    pub async fn start(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            let directive = Arc::new(directive);
            self.registry.insert(&directive);

            for failure in run_post_update(&directive).await {
                warn!(name = %directive.name, error = %failure, "post_update hook failed, continuing startup");
            }

            let file_changes = if directive.watch {
                match watch_directive(&directive, self.settings.watch_debounce) {
                    Ok(handle) => {
                        let rx = handle.subscribe();
                        self.watchers.push(handle);
                        Some(rx)
                    },
                    Err(e) => {
                        warn!(name = %directive.name, error = %e, "Watch disabled");
                        None
                    },
                }
            } else {
                None
            };

            for instance in 0..directive.instances {
                let monitor = InstanceMonitor::new(
                    Arc::clone(&directive),
                    instance,
                    self.registry.clone(),
                    Arc::clone(&self.sinks),
                    Arc::clone(&self.probe),
                    self.settings.memory_check_interval,
                    self.shutdown_tx.subscribe(),
                    file_changes.as_ref().map(|rx| rx.resubscribe()),
                );
                let name = directive.name.clone();
                self.monitors.spawn(async move {
                    let state = monitor.run().await;
                    MonitorExit {
                        name,
                        instance,
                        state,
                    }
                });
            }

            info!(
                name = %directive.name,
                instances = directive.instances,
                watch = directive.watch,
                "Directive started"
            );
        }
    }

    /// Wait until every monitor has finished on its own.
    pub async fn wait(&mut self) -> Vec<MonitorExit> {
        let mut exits = Vec::new();
        while let Some(joined) = self.monitors.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => error!(error = %e, "Monitor task failed"),
            }
        }
        exits
    }

    /// Stop every instance. Nothing is restarted.
    pub async fn shutdown(&mut self) -> Vec<MonitorExit> {
        info!(monitors = self.monitors.len(), "Stopping all instances");
        self.shutdown_tx.send_replace(true);

        let exits = self.wait().await;
        self.watchers.clear();
        self.sinks.clear();
        exits
    }

    /// Replace the running directives with `directives`.
    pub async fn reload(&mut self, directives: Vec<Directive>) {
        info!(previous = ?self.registry.names(), "Replacing directives");
        self.shutdown().await;
        self.registry.clear();
        self.shutdown_tx = watch::channel(false).0;
        self.start(directives).await;
    }

    /// Serve until SIGINT or SIGTERM, reloading on SIGHUP.
    ///
    /// `load` is called on every SIGHUP to re-read the document. If it fails
    /// the error is logged and the current directives keep running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::error::Error::Io) if signal handlers
    /// cannot be installed.
    pub async fn run_until_signal<F>(&mut self, mut load: F) -> Result<()>
    where
        F: FnMut() -> Result<Vec<Directive>>,
    {
        let mut signals = SignalListener::install()?;

        loop {
            tokio::select! {
                signal = signals.next() => match signal {
                    ControlSignal::Shutdown => {
                        info!("Shutdown requested");
                        self.shutdown().await;
                        return Ok(());
                    },
                    ControlSignal::Reload => match load() {
                        Ok(directives) => {
                            info!(directives = directives.len(), "Reloading");
                            self.reload(directives).await;
                        },
                        Err(e) => {
                            error!(error = %e, "Reload failed, keeping current directives");
                        },
                    },
                },
                Some(joined) = self.monitors.join_next() => match joined {
                    Ok(exit) => {
                        debug!(name = %exit.name, instance = exit.instance, state = %exit.state, "Monitor finished");
                        if self.monitors.is_empty() {
                            warn!(
                                directives = self.registry.directive_count(),
                                "No instances left running; waiting for reload or shutdown"
                            );
                        }
                    },
                    Err(e) => error!(error = %e, "Monitor task failed"),
                },
            }
        }
    }
}

#[cfg(unix)]
struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = |kind: SignalKind| {
            signal(kind).map_err(|e| crate::error::Error::io("installing signal handler", e))
        };

        Ok(Self {
            interrupt: listen(SignalKind::interrupt())?,
            terminate: listen(SignalKind::terminate())?,
            hangup: listen(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> ControlSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ControlSignal::Shutdown,
            _ = self.terminate.recv() => ControlSignal::Shutdown,
            _ = self.hangup.recv() => ControlSignal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> ControlSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        ControlSignal::Shutdown
    }
}
