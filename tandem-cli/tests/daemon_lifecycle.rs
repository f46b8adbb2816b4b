//! Binary-level daemon lifecycle tests. Each test uses its own HOME.

use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tandem_daemon::lock::DaemonLock;
use tempfile::TempDir;

fn tandem(home: &Path) -> Command {
    let mut command = Command::cargo_bin("tandem").expect("tandem binary");
    command
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("TANDEM_PROMPTER");
    command
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

/// Stops the background daemon when the test ends, pass or fail.
struct RunningDaemon<'a> {
    home: &'a Path,
}

impl<'a> RunningDaemon<'a> {
    fn start(home: &'a Path) -> Self {
        tandem(home)
            .args(["daemon", "start"])
            .assert()
            .success()
            .stdout(predicate::str::contains("daemon started"));
        Self { home }
    }
}

impl Drop for RunningDaemon<'_> {
    fn drop(&mut self) {
        let _ = tandem(self.home).args(["daemon", "stop"]).output();
        wait_until(Duration::from_secs(5), || {
            !DaemonLock::is_held(self.home).unwrap_or(false)
        });
    }
}

#[test]
fn stop_without_daemon_is_an_error() {
    let home = TempDir::new().expect("home");
    tandem(home.path())
        .args(["daemon", "stop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("daemon is not running"));
}

#[test]
fn second_start_is_a_no_op() {
    let home = TempDir::new().expect("home");
    let daemon = RunningDaemon::start(home.path());

    tandem(home.path())
        .args(["daemon", "start"])
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon already running"));

    tandem(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));

    drop(daemon);
    assert!(!DaemonLock::is_held(home.path()).expect("is_held"));
}

#[test]
fn create_list_terminate_local_session() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let _daemon = RunningDaemon::start(home.path());

    let alpha = work.path().join("alpha");
    let beta = work.path().join("beta");
    tandem(home.path())
        .arg("create")
        .arg(&alpha)
        .arg(&beta)
        .args(["--sync-mode", "two-way-resolved", "--ignore", "*.tmp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created session"));
    assert!(alpha.is_dir());
    assert!(beta.is_dir());

    let output = tandem(home.path())
        .args(["list", "--json"])
        .output()
        .expect("list");
    assert!(output.status.success());
    let sessions: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let sessions = sessions.as_array().expect("array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["status"], "connected");
    assert_eq!(
        sessions[0]["session"]["configuration"]["synchronizationMode"],
        "two-way-resolved"
    );
    let id = sessions[0]["session"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    tandem(home.path())
        .args(["terminate", &id])
        .assert()
        .success();
    tandem(home.path())
        .args(["terminate", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown session"));
}

#[test]
fn unsupported_setting_is_rejected_before_contacting_daemon() {
    let home = TempDir::new().expect("home");
    tandem(home.path())
        .args(["create", "/tmp/a", "/tmp/b", "--watch-mode", "inotify"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("watch mode"));
}

#[test]
fn create_without_daemon_points_at_daemon_start() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    tandem(home.path())
        .arg("create")
        .arg(work.path().join("a"))
        .arg(work.path().join("b"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("tandem daemon start"));
}

#[test]
fn askpass_mode_fails_without_daemon() {
    let home = TempDir::new().expect("home");
    tandem(home.path())
        .env("TANDEM_PROMPTER", "1-0")
        .arg("Password:")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to relay prompt"));
}
