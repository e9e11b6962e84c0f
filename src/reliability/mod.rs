//! Reliability primitives for supervised processes.
//!
//! - [`restart`]: crash-loop accounting and restart decisions

pub mod restart;

pub use restart::{CrashTracker, ExitKind, RestartDecision, RestartPolicy};
