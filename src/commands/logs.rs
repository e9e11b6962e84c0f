//! `keeper logs`: print the tail of a directive's log file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::load_directives;
use crate::daemon::process::tail_log;

/// Print the last `lines` lines of `name`'s output (or error) log.
pub fn execute(file: &Path, name: &str, lines: usize, err: bool, instance: u32) -> Result<()> {
    let loaded = load_directives(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let directive = loaded
        .directives
        .iter()
        .find(|d| d.name == name)
        .with_context(|| format!("No directive named '{name}' in {}", file.display()))?;

    if instance >= directive.instances {
        anyhow::bail!(
            "'{name}' has {} instance(s); instance {instance} does not exist",
            directive.instances
        );
    }

    let paths = directive.log_paths(instance);
    let path = if err { paths.error } else { paths.out };

    if !path.exists() {
        println!("No logs yet at {}", path.display());
        return Ok(());
    }

    for line in tail_log(&path, lines)? {
        println!("{line}");
    }
    Ok(())
}
