//! `keeper start`: run the supervisor in the foreground.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::select_directives;
use crate::config::load_directives;
use crate::daemon::{Supervisor, SupervisorSettings};

/// Load `file`, start every selected directive and serve until a shutdown
/// signal. SIGHUP re-reads `file`.
pub async fn execute(file: &Path, only: Option<&str>) -> Result<()> {
    let loaded = load_directives(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    for warning in &loaded.validation.warnings {
        warn!(warning = %warning, "Directive warning");
    }

    let directives = select_directives(loaded.directives, only)?;
    info!(
        file = %loaded.path.display(),
        directives = directives.len(),
        "Starting supervisor"
    );

    let mut supervisor = Supervisor::new(SupervisorSettings::default());
    supervisor.start(directives).await;

    let path = loaded.path;
    let only = only.map(str::to_string);
    supervisor
        .run_until_signal(move || {
            let reloaded = load_directives(&path)?;
            for warning in &reloaded.validation.warnings {
                warn!(warning = %warning, "Directive warning");
            }
            select_directives(reloaded.directives, only.as_deref())
        })
        .await
        .context("Supervisor failed")?;

    info!("Supervisor stopped");
    Ok(())
}
