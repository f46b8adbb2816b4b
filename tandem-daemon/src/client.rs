//! Starting a background daemon from the command line.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::Instant;

use crate::error::{io_err, DaemonError};
use crate::lock::DaemonLock;
use crate::paths::{logs_dir, socket_path, stderr_log_path, stdout_log_path, DAEMON_START_TIMEOUT};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started { pid: u32 },
}

/// Start `executable daemon run` in the background unless a daemon already
/// holds the lock, then wait until its socket accepts connections.
pub async fn start_background(home: &Path, executable: &Path) -> Result<StartOutcome, DaemonError> {
    if DaemonLock::is_held(home)? {
        return Ok(StartOutcome::AlreadyRunning);
    }

    let mut child = spawn_daemon(home, executable)?;
    let pid = child.id();
    tracing::debug!(pid, "spawned background daemon");

    let deadline = Instant::now() + DAEMON_START_TIMEOUT;
    loop {
        if UnixStream::connect(socket_path(home)).await.is_ok() {
            return Ok(StartOutcome::Started { pid });
        }
        if let Some(status) = child.try_wait().map_err(|e| io_err(executable, e))? {
            // A concurrent start may have won the lock.
            if DaemonLock::is_held(home)? {
                return Ok(StartOutcome::AlreadyRunning);
            }
            return Err(DaemonError::StartFailed(format!(
                "daemon exited with {status}; see {}",
                stderr_log_path(home).display()
            )));
        }
        if Instant::now() >= deadline {
            return Err(DaemonError::StartFailed(format!(
                "daemon did not accept connections within {}s; see {}",
                DAEMON_START_TIMEOUT.as_secs(),
                stderr_log_path(home).display()
            )));
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

fn spawn_daemon(home: &Path, executable: &Path) -> Result<Child, DaemonError> {
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    let stdout = append_log(&stdout_log_path(home))?;
    let stderr = append_log(&stderr_log_path(home))?;

    let mut command = Command::new(executable);
    command
        .args(["daemon", "run"])
        .env("HOME", home)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command.spawn().map_err(|e| io_err(executable, e))
}

fn append_log(path: &Path) -> Result<File, DaemonError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}
