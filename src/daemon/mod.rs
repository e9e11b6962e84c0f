//! Supervision runtime.
//!
//! ## Module Structure
//!
//! - [`paths`]: Keeper home and log file locations
//! - [`process`]: Spawning, stopping, hooks, memory, log capture, watching
//! - [`registry`]: Owned table of directives and instance states
//! - [`monitor`]: Per-instance supervision loop
//! - [`supervisor`]: Startup, shutdown and reload of all monitors

pub mod monitor;
pub mod paths;
pub mod process;
pub mod registry;
pub mod supervisor;

pub use registry::{InstanceStatus, ProcessState, Registry};
pub use supervisor::{MonitorExit, Supervisor, SupervisorSettings};
