//! Shared defaults for directive loading and supervision.
//!
//! Values mirror the defaults of common Node-style process managers so that
//! existing ecosystem files behave the same when moved over.

/// Default number of instances per directive.
pub const DEFAULT_INSTANCES: u32 = 1;

/// Default ceiling on consecutive unstable crashes.
pub const DEFAULT_MAX_RESTARTS: u32 = 16;

/// Default minimum uptime (ms) for a run to count as stable.
pub const DEFAULT_MIN_UPTIME_MS: u64 = 1_000;

/// Default delay (ms) between a crash and the next spawn.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 0;

/// Default grace period (ms) between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 1_600;

/// Interval between resident memory samples.
pub const MEMORY_CHECK_INTERVAL_SECS: u64 = 30;

/// Quiet period after a filesystem event before a watch restart fires.
pub const WATCH_DEBOUNCE_MS: u64 = 500;

/// Separator between the timestamp prefix and the log line.
pub const LOG_PREFIX_SEPARATOR: &str = ": ";

/// Environment variable carrying the instance index into the child.
pub const INSTANCE_ENV_VAR: &str = "KEEPER_INSTANCE";

/// Environment variable carrying the directive name into the child.
pub const APP_NAME_ENV_VAR: &str = "KEEPER_APP_NAME";

/// Environment variable overriding the keeper home directory.
pub const HOME_ENV_VAR: &str = "KEEPER_HOME";

/// Shell used for post-update hooks.
pub const HOOK_SHELL: &str = "sh";

/// How long to wait for output pumps to drain after an instance exits.
pub const PUMP_DRAIN_TIMEOUT_MS: u64 = 2_000;
