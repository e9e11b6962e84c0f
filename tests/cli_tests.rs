//! Tests that drive the `keeper` binary.
//!
//! The keeper home is redirected with `KEEPER_HOME` on the child process, so
//! nothing touches the real `~/.keeper`. Tests that signal a running
//! supervisor are serialized to keep their timing predictable.

#![cfg(unix)]

#[path = "common.rs"]
mod common;

use std::process::{Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use common::{write_ecosystem, write_script};
use serial_test::serial;
use tempfile::TempDir;

fn keeper(home: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_keeper"));
    command
        .env("KEEPER_HOME", home.path())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null());
    command
}

fn run(command: &mut Command) -> Output {
    command.output().expect("failed to run keeper")
}

fn signal(pid: u32, signal: nix::sys::signal::Signal) {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal).unwrap();
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

// =============================================================================
// keeper check
// =============================================================================

#[test]
fn test_check_json_reports_resolved_defaults() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let file = write_ecosystem(
        project.path(),
        "[[apps]]\nname = \"api\"\nscript = \"./server.sh\"\nmax_memory_restart = \"1G\"\nmin_uptime = \"10s\"\n",
    );

    let output = run(keeper(&home).args(["check", "--json"]).arg(&file));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let api = &report["directives"][0];
    assert_eq!(api["name"], "api");
    assert_eq!(api["instances"], 1);
    assert_eq!(api["autorestart"], true);
    assert_eq!(api["max_restarts"], 16);
    assert_eq!(api["min_uptime"], 10_000);
    assert_eq!(api["max_memory_restart"], 1_073_741_824u64);

    let out_file = api["out_file"].as_str().unwrap();
    assert!(out_file.starts_with(home.path().to_str().unwrap()));
    assert!(out_file.ends_with("logs/api-out.log"));

    // server.sh does not exist yet.
    assert_eq!(report["warnings"].as_array().unwrap().len(), 1);
}

#[test]
fn test_check_rejects_missing_script() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let file = write_ecosystem(project.path(), "[[apps]]\nname = \"api\"\n");

    let output = run(keeper(&home).arg("check").arg(&file));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid field 'script'"), "{stderr}");
}

#[test]
fn test_check_rejects_unknown_file() {
    let home = TempDir::new().unwrap();
    let output = run(keeper(&home).args(["check", "/nonexistent/ecosystem.toml"]));
    assert!(!output.status.success());
}

// =============================================================================
// keeper logs
// =============================================================================

#[test]
fn test_logs_tails_output_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let file = write_ecosystem(
        project.path(),
        "[[apps]]\nname = \"api\"\nscript = \"run.sh\"\nout_file = \"out.log\"\n",
    );
    std::fs::write(project.path().join("out.log"), "one\ntwo\nthree\n").unwrap();

    let output = run(keeper(&home)
        .arg("logs")
        .arg(&file)
        .args(["--name", "api", "--lines", "2"]));
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "two\nthree\n");

    let output = run(keeper(&home).arg("logs").arg(&file).args(["--name", "web"]));
    assert!(!output.status.success());
}

// =============================================================================
// keeper start
// =============================================================================

#[test]
#[serial]
fn test_start_stops_children_on_sigterm() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write_script(project.path(), "echo $$ > child.pid\nexec sleep 30\n");
    let file = write_ecosystem(
        project.path(),
        "[[apps]]\nname = \"api\"\nscript = \"run.sh\"\ninterpreter = \"/bin/sh\"\nkill_timeout = 500\n",
    );

    let mut supervisor = keeper(&home).arg("start").arg(&file).spawn().unwrap();
    let pid_file = project.path().join("child.pid");
    assert!(wait_for(|| pid_file.exists(), Duration::from_secs(5)));
    sleep(Duration::from_millis(100));
    let child: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();

    signal(supervisor.id(), nix::sys::signal::Signal::SIGTERM);
    let status = supervisor.wait().unwrap();
    assert!(status.success());

    assert!(!keeper::daemon::process::is_running(child));
}

#[test]
#[serial]
fn test_start_directive_env_overrides_inherited() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write_script(project.path(), "echo \"$APP_MODE $KEEPER_SHARED\" > mode.txt\nexec sleep 30\n");
    let file = write_ecosystem(
        project.path(),
        "[[apps]]\nname = \"api\"\nscript = \"run.sh\"\ninterpreter = \"/bin/sh\"\nkill_timeout = 500\n\n[apps.env]\nAPP_MODE = \"directive\"\n",
    );

    let mut supervisor = keeper(&home)
        .env("APP_MODE", "ambient")
        .env("KEEPER_SHARED", "inherited")
        .arg("start")
        .arg(&file)
        .spawn()
        .unwrap();

    let mode_file = project.path().join("mode.txt");
    let read_mode = || std::fs::read_to_string(&mode_file).unwrap_or_default();
    assert!(wait_for(|| read_mode().ends_with('\n'), Duration::from_secs(5)));
    assert_eq!(read_mode(), "directive inherited\n");

    signal(supervisor.id(), nix::sys::signal::Signal::SIGTERM);
    assert!(supervisor.wait().unwrap().success());
}

#[test]
#[serial]
fn test_start_reloads_on_sighup() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write_script(project.path(), "echo started >> starts.log\nexec sleep 30\n");
    let doc = "[[apps]]\nname = \"api\"\nscript = \"run.sh\"\ninterpreter = \"/bin/sh\"\nkill_timeout = 500\npost_update = [\"echo hook >> hooks.log\"]\n";
    let file = write_ecosystem(project.path(), doc);

    let mut supervisor = keeper(&home).arg("start").arg(&file).spawn().unwrap();
    let starts = project.path().join("starts.log");
    let count = |path: &std::path::Path| {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    };
    assert!(wait_for(|| count(&starts) == 1, Duration::from_secs(5)));

    // A broken document keeps the current directives running.
    std::fs::write(&file, "[[apps]]\nname = \"api\"\n").unwrap();
    signal(supervisor.id(), nix::sys::signal::Signal::SIGHUP);
    sleep(Duration::from_millis(500));
    assert_eq!(count(&starts), 1);

    std::fs::write(&file, doc).unwrap();
    signal(supervisor.id(), nix::sys::signal::Signal::SIGHUP);
    assert!(wait_for(|| count(&starts) == 2, Duration::from_secs(5)));
    assert_eq!(count(&project.path().join("hooks.log")), 2);

    signal(supervisor.id(), nix::sys::signal::Signal::SIGINT);
    assert!(supervisor.wait().unwrap().success());
}
