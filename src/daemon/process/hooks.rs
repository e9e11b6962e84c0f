//! Post-update hooks.
//!
//! Hooks run once per (re)load, in order, each to completion, before any
//! instance of the directive is spawned. A failing hook is logged and the
//! remaining hooks still run.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Directive;
use crate::constants::HOOK_SHELL;
use crate::error::Error;

/// Run the directive's `post_update` hooks.
///
/// Returns one [`Error::HookExecution`] per failed hook, unlogged. The caller
/// reports them; startup is never blocked here.
pub async fn run_post_update(directive: &Directive) -> Vec<Error> {
    let mut failures = Vec::new();

    for (index, hook) in directive.post_update.iter().enumerate() {
        info!(name = %directive.name, hook = %hook, index, "Running post_update hook");

        match run_hook(directive, hook).await {
            Ok(()) => debug!(name = %directive.name, hook = %hook, "Hook finished"),
            Err(err) => failures.push(err),
        }
    }

    failures
}

async fn run_hook(directive: &Directive, hook: &str) -> Result<(), Error> {
    let output = Command::new(HOOK_SHELL)
        .arg("-c")
        .arg(hook)
        .current_dir(&directive.cwd)
        .envs(&directive.env)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::hook(hook, format!("could not start shell: {e}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = match output.status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    };

    Err(Error::hook(
        hook,
        if stderr.trim().is_empty() {
            reason
        } else {
            format!("{reason}: {}", stderr.trim())
        },
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::EcosystemConfig;
    use std::path::Path;
    use tempfile::TempDir;

    fn directive(dir: &Path, hooks: &[&str]) -> Directive {
        let hooks = hooks
            .iter()
            .map(|h| format!("{h:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        let doc = format!(
            "[[apps]]\nname = \"svc\"\nscript = \"run.sh\"\npost_update = [{hooks}]\n[apps.env]\nHOOK_VALUE = \"abc\"\n"
        );
        let (mut directives, _) = EcosystemConfig::parse(&doc, Path::new("test.toml"))
            .unwrap()
            .resolve(dir, dir)
            .unwrap();
        directives.remove(0)
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_in_cwd() {
        let dir = TempDir::new().unwrap();
        let d = directive(
            dir.path(),
            &["mkdir -p logs", "echo first >> logs/order", "echo $HOOK_VALUE >> logs/order"],
        );

        let failures = run_post_update(&d).await;
        assert!(failures.is_empty());

        let content = std::fs::read_to_string(dir.path().join("logs/order")).unwrap();
        assert_eq!(content, "first\nabc\n");
    }

    #[tokio::test]
    async fn test_failed_hook_does_not_stop_later_hooks() {
        let dir = TempDir::new().unwrap();
        let d = directive(dir.path(), &["echo boom >&2; exit 4", "touch after"]);

        let failures = run_post_update(&d).await;
        assert_eq!(failures.len(), 1);
        let message = failures[0].to_string();
        assert!(message.contains("exit status 4"), "{message}");
        assert!(message.contains("boom"), "{message}");
        assert!(dir.path().join("after").exists());
    }
}
