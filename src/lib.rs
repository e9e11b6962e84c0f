//! keeper: a foreground process supervisor driven by a TOML ecosystem file.
//!
//! ## Module Structure
//!
//! - [`config`]: Ecosystem document loading and directive validation
//! - [`daemon`]: Supervision runtime (registry, monitors, process control)
//! - [`reliability`]: Crash-loop accounting
//! - [`date_format`]: Log timestamp patterns
//! - [`error`]: Library error type
//! - [`commands`]: CLI command handlers

pub mod commands;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod date_format;
pub mod error;
pub mod reliability;
pub mod ui;
pub mod utils;

pub use config::{Directive, EcosystemConfig, LoadedEcosystem, load_directives};
pub use daemon::{ProcessState, Registry, Supervisor, SupervisorSettings};
pub use error::{Error, Result};
