use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::broadcast;

use crate::control::DaemonService;
use crate::endpoint::{DefaultConnector, EndpointConnector};
use crate::error::{io_err, DaemonError};
use crate::lock::DaemonLock;
use crate::paths::{daemon_dir, logs_dir, socket_path, SESSION_SHUTDOWN_TIMEOUT};
use crate::prompt::PromptService;
use crate::rpc::Server;
use crate::session::SessionService;

/// Why the daemon stopped serving. Exactly one cause wins the race.
#[derive(Debug)]
pub enum TerminationCause {
    Signal(&'static str),
    Requested,
    ServerFailed(DaemonError),
}

impl TerminationCause {
    /// A termination request is a clean exit; everything else is an error.
    pub fn into_result(self) -> Result<(), DaemonError> {
        match self {
            Self::Signal(name) => Err(DaemonError::Signal(name)),
            Self::Requested => Ok(()),
            Self::ServerFailed(err) => Err(DaemonError::PrematureTermination(Box::new(err))),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until a signal, a termination request, or a server
/// failure.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let connector: Arc<dyn EndpointConnector> = Arc::new(DefaultConnector::new()?);
    run_with(home, connector, shutdown_signal()).await
}

/// [`run`] with an explicit endpoint connector and signal source.
///
/// `signal` resolves with the name of the signal that should stop the
/// daemon.
pub async fn run_with<S>(
    home: PathBuf,
    connector: Arc<dyn EndpointConnector>,
    signal: S,
) -> Result<(), DaemonError>
where
    S: Future<Output = &'static str> + Send,
{
    let lock = DaemonLock::acquire(&home)?;
    ensure_runtime_dirs(&home)?;

    let (control, mut termination_rx) = DaemonService::new();
    let prompts = Arc::new(PromptService::new());
    let sessions = Arc::new(SessionService::load(home.clone(), prompts.clone(), connector)?);

    let mut server = Server::new();
    server.register(Arc::new(control))?;
    server.register(prompts)?;
    server.register(sessions.clone())?;

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), pid = std::process::id(), "daemon serving");

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let mut serve = tokio::spawn(Arc::new(server).serve(listener, shutdown_rx));

    let cause = tokio::select! {
        name = signal => TerminationCause::Signal(name),
        _ = termination_rx.recv() => TerminationCause::Requested,
        result = &mut serve => match result {
            Ok(Ok(())) => TerminationCause::ServerFailed(DaemonError::Protocol(
                "listener stopped accepting".into(),
            )),
            Ok(Err(err)) => TerminationCause::ServerFailed(err),
            Err(err) => TerminationCause::ServerFailed(DaemonError::Protocol(format!(
                "server task join failure: {err}"
            ))),
        },
    };

    match &cause {
        TerminationCause::Signal(name) => tracing::error!(signal = name, "terminated by signal"),
        TerminationCause::Requested => tracing::info!("termination requested"),
        TerminationCause::ServerFailed(err) => {
            tracing::error!(error = %err, "premature server termination")
        }
    }

    // Every open stream is cancelled before sessions are halted.
    if !matches!(cause, TerminationCause::ServerFailed(_)) {
        let _ = shutdown_tx.send(());
        match serve.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "server stopped with an error"),
            Err(err) => tracing::warn!(error = %err, "server task join failure"),
        }
    }

    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "failed to remove daemon socket");
        }
    }

    if tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, sessions.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SESSION_SHUTDOWN_TIMEOUT.as_secs(),
            "session shutdown timed out",
        );
    }

    drop(lock);
    cause.into_result()
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "interrupt",
                _ = terminate.recv() => "terminated",
            },
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                wait_for_ctrl_c().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await
    }
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    "interrupt"
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [daemon_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
