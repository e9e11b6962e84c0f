//! Error types for directive loading and supervision.
//!
//! Library code returns [`Error`]; the CLI wraps it in `anyhow` at the edge.

use std::path::PathBuf;

/// Result type for keeper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading directives or supervising their processes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A directive field is missing or malformed. Fatal for that document.
    #[error("invalid field '{field}': {reason}")]
    ConfigLoad { field: String, reason: String },

    /// The ecosystem document could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ecosystem document is not valid TOML for the expected shape.
    #[error("failed to parse config file {path:?}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    /// A post-update hook failed. Logged, never fatal.
    #[error("hook '{command}' failed: {reason}")]
    HookExecution { command: String, reason: String },

    /// The managed command could not be started.
    #[error("failed to spawn '{name}': {reason}")]
    Spawn { name: String, reason: String },

    /// Consecutive unstable runs reached `max_restarts`.
    #[error("'{name}' instance {instance} gave up after {crashes} consecutive unstable runs")]
    CrashLoopExhausted {
        name: String,
        instance: u32,
        crashes: u32,
    },

    /// Resident memory crossed `max_memory_restart`.
    #[error("'{name}' instance {instance} uses {rss} bytes, limit is {limit} bytes")]
    MemoryLimitExceeded {
        name: String,
        instance: u32,
        rss: u64,
        limit: u64,
    },

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a config load error for `field`.
    pub fn config_load(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a hook execution error.
    pub fn hook(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookExecution {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a spawn error.
    pub fn spawn(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field for config load errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ConfigLoad { field, .. } => Some(field),
            _ => None,
        }
    }
}
