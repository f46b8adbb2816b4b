use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DAEMON_LOCK: &str = "daemon.lock";

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";

/// Upper bound on the session service's shutdown during daemon exit.
pub const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `daemon start` waits for a freshly spawned daemon to answer.
pub const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable carrying the prompter id to the askpass helper.
pub const PROMPTER_ENV: &str = "TANDEM_PROMPTER";

pub fn tandem_root(home: &Path) -> PathBuf {
    home.join(".tandem")
}

pub fn daemon_dir(home: &Path) -> PathBuf {
    tandem_root(home).join("daemon")
}

pub fn socket_path(home: &Path) -> PathBuf {
    daemon_dir(home).join(DAEMON_SOCKET)
}

pub fn lock_path(home: &Path) -> PathBuf {
    daemon_dir(home).join(DAEMON_LOCK)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    tandem_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
