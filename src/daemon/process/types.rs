//! Launch parameters for a single supervised instance.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Directive;
use crate::constants::{APP_NAME_ENV_VAR, INSTANCE_ENV_VAR};

/// Everything needed to start one instance of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Directive name, used in logs and errors.
    pub name: String,
    /// Instance index within the directive.
    pub instance: u32,
    /// Program to execute (interpreter or script).
    pub program: PathBuf,
    /// Arguments passed to `program`.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl SpawnConfig {
    /// Build the launch parameters for `instance` of `directive`.
    pub fn for_instance(directive: &Directive, instance: u32) -> Self {
        let (program, args) = directive.command_line();

        let mut env = directive.env.clone();
        env.insert(INSTANCE_ENV_VAR.to_string(), instance.to_string());
        env.insert(APP_NAME_ENV_VAR.to_string(), directive.name.clone());

        Self {
            name: directive.name.clone(),
            instance,
            program,
            args,
            cwd: directive.cwd.clone(),
            env,
        }
    }
}
