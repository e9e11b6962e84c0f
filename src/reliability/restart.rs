//! Crash-loop accounting for supervised instances.
//!
//! Every instance owns a [`CrashTracker`]. Each exit is fed to
//! [`CrashTracker::record_exit`] together with the run's uptime and the
//! tracker answers with a [`RestartDecision`].
//!
//! ## Rules
//!
//! - A run that lasted at least `min_uptime` is stable: the consecutive crash
//!   counter is reset to zero before the exit is counted.
//! - Non-zero exits, signal deaths and spawn failures are crashes and
//!   increment the counter.
//! - A clean exit before `min_uptime` is unstable too and increments the
//!   counter; a clean exit after a stable run does not.
//! - When the counter reaches `max_restarts` the instance gives up.
//! - Exit codes listed in `stop_exit_codes` are final and never restarted.
//! - Forced restarts (memory limit, watch) never touch the counter.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use keeper::reliability::{CrashTracker, ExitKind, RestartDecision, RestartPolicy};
//!
//! let mut tracker = CrashTracker::new(RestartPolicy {
//!     max_restarts: 2,
//!     min_uptime: Duration::from_secs(5),
//!     ..RestartPolicy::default()
//! });
//!
//! let first = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
//! assert!(matches!(first, RestartDecision::Restart { .. }));
//!
//! let second = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
//! assert_eq!(second, RestartDecision::GiveUp { crashes: 2 });
//! ```

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use crate::constants;

/// Restart settings extracted from a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restart after an exit at all.
    pub autorestart: bool,
    /// Consecutive unstable runs that end supervision.
    pub max_restarts: u32,
    /// Uptime after which a run counts as stable.
    pub min_uptime: Duration,
    /// Fixed delay before respawning after an exit.
    pub restart_delay: Duration,
    /// Exit codes that stop the instance for good.
    pub stop_exit_codes: Vec<i32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            autorestart: true,
            max_restarts: constants::DEFAULT_MAX_RESTARTS,
            min_uptime: Duration::from_millis(constants::DEFAULT_MIN_UPTIME_MS),
            restart_delay: Duration::from_millis(constants::DEFAULT_RESTART_DELAY_MS),
            stop_exit_codes: Vec::new(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with the given status code.
    Code(i32),
    /// Killed by the given signal number.
    Signal(i32),
    /// The command never started.
    SpawnFailed(String),
}

impl ExitKind {
    /// Classify a child's exit status.
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }

        Self::Code(-1)
    }

    /// Whether this exit counts as a crash.
    pub fn is_crash(&self) -> bool {
        !matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::SpawnFailed(reason) => write!(f, "spawn failed: {reason}"),
        }
    }
}

/// What the supervisor should do after an exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Wait `delay`, then spawn again.
    Restart { delay: Duration },
    /// Leave the instance down without giving up (autorestart off or a stop code).
    Stop,
    /// Crash loop exhausted; terminal.
    GiveUp { crashes: u32 },
}

/// Per-instance crash counter.
#[derive(Debug, Clone)]
pub struct CrashTracker {
    policy: RestartPolicy,
    consecutive_crashes: u32,
    restarts: u32,
    given_up: bool,
}

impl CrashTracker {
    /// Create a tracker for `policy`.
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            consecutive_crashes: 0,
            restarts: 0,
            given_up: false,
        }
    }

    /// Record an exit after `uptime` and decide what happens next.
    ///
    /// Once the tracker has given up every further call returns
    /// [`RestartDecision::GiveUp`] again.
    pub fn record_exit(&mut self, exit: &ExitKind, uptime: Duration) -> RestartDecision {
        if self.given_up {
            return RestartDecision::GiveUp {
                crashes: self.consecutive_crashes,
            };
        }

        let stable = uptime >= self.policy.min_uptime;
        if stable {
            self.consecutive_crashes = 0;
        }

        if let ExitKind::Code(code) = exit
            && self.policy.stop_exit_codes.contains(code)
        {
            return RestartDecision::Stop;
        }

        let unstable = exit.is_crash() || !stable;
        if unstable {
            self.consecutive_crashes = self.consecutive_crashes.saturating_add(1);
        }

        if !self.policy.autorestart {
            return RestartDecision::Stop;
        }

        if unstable && self.consecutive_crashes >= self.policy.max_restarts {
            self.given_up = true;
            return RestartDecision::GiveUp {
                crashes: self.consecutive_crashes,
            };
        }

        self.restarts = self.restarts.saturating_add(1);
        RestartDecision::Restart {
            delay: self.policy.restart_delay,
        }
    }

    /// Record a forced restart (memory limit or watch). Crash count is untouched.
    pub fn record_forced_restart(&mut self) {
        self.restarts = self.restarts.saturating_add(1);
    }

    /// Consecutive unstable runs so far.
    pub fn consecutive_crashes(&self) -> u32 {
        self.consecutive_crashes
    }

    /// Total restarts, crash-driven and forced.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Whether the crash loop has been exhausted.
    pub fn has_given_up(&self) -> bool {
        self.given_up
    }

    /// The policy this tracker applies.
    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_restarts: u32, min_uptime_secs: u64, delay_ms: u64) -> RestartPolicy {
        RestartPolicy {
            autorestart: true,
            max_restarts,
            min_uptime: Duration::from_secs(min_uptime_secs),
            restart_delay: Duration::from_millis(delay_ms),
            stop_exit_codes: Vec::new(),
        }
    }

    #[test]
    fn test_immediate_crashes_give_up_at_max_restarts() {
        let mut tracker = CrashTracker::new(policy(10, 10, 4000));

        for attempt in 1..10 {
            let decision = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
            assert_eq!(
                decision,
                RestartDecision::Restart {
                    delay: Duration::from_millis(4000)
                },
                "crash {attempt} should restart"
            );
        }

        let decision = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
        assert_eq!(decision, RestartDecision::GiveUp { crashes: 10 });
        assert!(tracker.has_given_up());
        assert_eq!(tracker.restarts(), 9);

        // Terminal: a stray exit after giving up never restarts.
        let again = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
        assert!(matches!(again, RestartDecision::GiveUp { .. }));
    }

    #[test]
    fn test_three_quick_crashes_scenario() {
        let mut tracker = CrashTracker::new(policy(3, 5, 1000));

        let uptimes = [0, 200, 300];
        let decisions: Vec<_> = uptimes
            .iter()
            .map(|ms| tracker.record_exit(&ExitKind::Code(2), Duration::from_millis(*ms)))
            .collect();

        assert!(matches!(decisions[0], RestartDecision::Restart { .. }));
        assert!(matches!(decisions[1], RestartDecision::Restart { .. }));
        assert_eq!(decisions[2], RestartDecision::GiveUp { crashes: 3 });
        assert_eq!(tracker.restarts(), 2);
    }

    #[test]
    fn test_stable_run_resets_counter_before_counting() {
        let mut tracker = CrashTracker::new(policy(10, 10, 0));

        for _ in 0..5 {
            tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
        }
        assert_eq!(tracker.consecutive_crashes(), 5);

        tracker.record_exit(&ExitKind::Code(1), Duration::from_secs(15));
        assert_eq!(tracker.consecutive_crashes(), 1);
    }

    #[test]
    fn test_stable_clean_exit_restarts_without_counting() {
        let mut tracker = CrashTracker::new(policy(1, 10, 50));

        let decision = tracker.record_exit(&ExitKind::Code(0), Duration::from_secs(30));
        assert_eq!(
            decision,
            RestartDecision::Restart {
                delay: Duration::from_millis(50)
            }
        );
        assert_eq!(tracker.consecutive_crashes(), 0);
    }

    #[test]
    fn test_quick_clean_exits_give_up() {
        let mut tracker = CrashTracker::new(policy(3, 5, 0));

        assert!(matches!(
            tracker.record_exit(&ExitKind::Code(0), Duration::ZERO),
            RestartDecision::Restart { .. }
        ));
        assert!(matches!(
            tracker.record_exit(&ExitKind::Code(0), Duration::from_millis(10)),
            RestartDecision::Restart { .. }
        ));
        assert_eq!(tracker.consecutive_crashes(), 2);
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(0), Duration::ZERO),
            RestartDecision::GiveUp { crashes: 3 }
        );
    }

    #[test]
    fn test_quick_clean_exit_and_crash_share_counter() {
        let mut tracker = CrashTracker::new(policy(2, 5, 0));
        tracker.record_exit(&ExitKind::Code(0), Duration::ZERO);
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(1), Duration::ZERO),
            RestartDecision::GiveUp { crashes: 2 }
        );
    }

    #[test]
    fn test_signal_death_is_a_crash() {
        let mut tracker = CrashTracker::new(policy(1, 10, 0));
        let decision = tracker.record_exit(&ExitKind::Signal(9), Duration::ZERO);
        assert_eq!(decision, RestartDecision::GiveUp { crashes: 1 });
    }

    #[test]
    fn test_spawn_failure_is_a_crash() {
        let mut tracker = CrashTracker::new(policy(2, 10, 0));
        tracker.record_exit(&ExitKind::SpawnFailed("not found".into()), Duration::ZERO);
        assert_eq!(tracker.consecutive_crashes(), 1);
    }

    #[test]
    fn test_zero_max_restarts_gives_up_on_first_crash() {
        let mut tracker = CrashTracker::new(policy(0, 10, 0));
        let decision = tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
        assert_eq!(decision, RestartDecision::GiveUp { crashes: 1 });
    }

    #[test]
    fn test_autorestart_disabled_stops() {
        let mut tracker = CrashTracker::new(RestartPolicy {
            autorestart: false,
            ..policy(10, 10, 0)
        });
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(1), Duration::ZERO),
            RestartDecision::Stop
        );
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(0), Duration::ZERO),
            RestartDecision::Stop
        );
        assert!(!tracker.has_given_up());
    }

    #[test]
    fn test_stop_exit_codes_are_final() {
        let mut tracker = CrashTracker::new(RestartPolicy {
            stop_exit_codes: vec![0, 3],
            ..policy(10, 10, 0)
        });
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(3), Duration::ZERO),
            RestartDecision::Stop
        );
        assert_eq!(
            tracker.record_exit(&ExitKind::Code(0), Duration::ZERO),
            RestartDecision::Stop
        );
        assert_eq!(tracker.consecutive_crashes(), 0);
    }

    #[test]
    fn test_forced_restart_leaves_crash_count() {
        let mut tracker = CrashTracker::new(policy(10, 10, 0));
        tracker.record_exit(&ExitKind::Code(1), Duration::ZERO);
        tracker.record_forced_restart();
        assert_eq!(tracker.consecutive_crashes(), 1);
        assert_eq!(tracker.restarts(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_kind_from_status() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(0)), ExitKind::Code(0));
        assert_eq!(
            ExitKind::from_status(ExitStatus::from_raw(1 << 8)),
            ExitKind::Code(1)
        );
        assert_eq!(ExitKind::from_status(ExitStatus::from_raw(9)), ExitKind::Signal(9));
    }
}
