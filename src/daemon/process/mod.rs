//! Process management for supervised instances.
//!
//! ## Module Structure
//!
//! - [`types`]: Launch parameters
//! - [`lifecycle`]: Process spawning and termination
//! - [`hooks`]: Post-update hooks
//! - [`health`]: Memory sampling and log reading
//! - [`log_writer`]: Timestamped, append-only output capture
//! - [`watch`]: Restart-on-change file watching

pub mod health;
pub mod hooks;
pub mod lifecycle;
pub mod log_writer;
pub mod types;
pub mod watch;

pub use health::{MemoryProbe, SysinfoProbe, is_running, tail_log};
pub use hooks::run_post_update;
pub use lifecycle::{spawn_instance, stop_instance, terminate_orphans};
pub use log_writer::{LogSink, LogSinks, pump_lines};
pub use types::SpawnConfig;
pub use watch::{WatchHandle, watch_directive};
