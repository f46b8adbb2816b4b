//! Endpoint connections.
//!
//! The synchronization engine itself lives behind [`Endpoint`]; this crate
//! only needs to open an endpoint for each side of a session and close it
//! again. Remote endpoints are reached over `ssh`, with every credential
//! prompt routed back through the daemon's prompt relay.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tandem_core::{Configuration, Protocol, Url};
use tokio::process::Command;

use crate::error::{io_err, DaemonError};
use crate::paths::PROMPTER_ENV;
use crate::prompt::Prompter;

/// One open side of a session.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn url(&self) -> &Url;

    async fn shutdown(&mut self) -> Result<(), DaemonError>;
}

/// How an endpoint reaches the user when it needs credentials.
#[derive(Clone)]
pub struct PromptContext {
    /// Registry id handed to the askpass helper.
    pub id: String,
    pub prompter: Arc<dyn Prompter>,
}

/// Opens endpoints for the session service.
#[async_trait]
pub trait EndpointConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &Url,
        configuration: &Configuration,
        prompt: &PromptContext,
    ) -> Result<Box<dyn Endpoint>, DaemonError>;
}

// ---------------------------------------------------------------------------
// Default connector
// ---------------------------------------------------------------------------

/// Local directories and `ssh`-reachable hosts.
pub struct DefaultConnector {
    askpass: PathBuf,
}

impl DefaultConnector {
    /// Uses the running executable as the askpass helper.
    pub fn new() -> Result<Self, DaemonError> {
        let askpass = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
        Ok(Self { askpass })
    }

    pub fn with_askpass(askpass: PathBuf) -> Self {
        Self { askpass }
    }
}

#[async_trait]
impl EndpointConnector for DefaultConnector {
    async fn connect(
        &self,
        url: &Url,
        configuration: &Configuration,
        prompt: &PromptContext,
    ) -> Result<Box<dyn Endpoint>, DaemonError> {
        tracing::debug!(
            url = %url,
            mode = %configuration.synchronization_mode,
            "connecting endpoint",
        );
        match url.protocol {
            Protocol::Local => LocalEndpoint::open(url.clone()).await,
            Protocol::Ssh => SshEndpoint::open(url.clone(), &self.askpass, &prompt.id).await,
        }
    }
}

struct LocalEndpoint {
    url: Url,
}

impl LocalEndpoint {
    async fn open(url: Url) -> Result<Box<dyn Endpoint>, DaemonError> {
        tokio::fs::create_dir_all(&url.path)
            .await
            .map_err(|err| DaemonError::Endpoint {
                url: url.to_string(),
                message: format!("unable to create synchronization root: {err}"),
            })?;
        Ok(Box::new(Self { url }))
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        Ok(())
    }
}

struct SshEndpoint {
    url: Url,
}

impl SshEndpoint {
    /// Runs an authenticated no-op command so that host-key and password
    /// prompts happen while the creating client is still attached.
    async fn open(
        url: Url,
        askpass: &std::path::Path,
        prompter: &str,
    ) -> Result<Box<dyn Endpoint>, DaemonError> {
        let output = Command::new("ssh")
            .args(ssh_probe_args(&url))
            .env("SSH_ASKPASS", askpass)
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env(PROMPTER_ENV, prompter)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| DaemonError::Endpoint {
                url: url.to_string(),
                message: format!("unable to run ssh: {err}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("ssh exited with {}", output.status)
            } else {
                stderr
            };
            return Err(DaemonError::Endpoint {
                url: url.to_string(),
                message,
            });
        }
        Ok(Box::new(Self { url }))
    }
}

#[async_trait]
impl Endpoint for SshEndpoint {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        Ok(())
    }
}

fn ssh_probe_args(url: &Url) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(port) = url.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if url.user.is_empty() {
        args.push(url.host.clone());
    } else {
        args.push(format!("{}@{}", url.user, url.host));
    }
    args.push("exit".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Challenge;

    struct Silent;

    #[async_trait]
    impl Prompter for Silent {
        async fn prompt(&self, _challenge: Challenge) -> Result<String, DaemonError> {
            Err(DaemonError::Prompt("no terminal".into()))
        }
    }

    fn context() -> PromptContext {
        PromptContext {
            id: "test".into(),
            prompter: Arc::new(Silent),
        }
    }

    #[test]
    fn probe_args_include_port_and_user() {
        let url = Url::parse("ssh://me@example.com:2222/srv/data").expect("url");
        assert_eq!(
            ssh_probe_args(&url),
            vec!["-p", "2222", "me@example.com", "exit"]
        );
    }

    #[test]
    fn probe_args_without_user_or_port() {
        let url = Url::parse("example.com:data").expect("url");
        assert_eq!(ssh_probe_args(&url), vec!["example.com", "exit"]);
    }

    #[tokio::test]
    async fn local_endpoint_creates_its_root() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let root = dir.path().join("nested/root");
        let url = Url::local(root.to_string_lossy().into_owned());

        let connector = DefaultConnector::with_askpass(PathBuf::from("/bin/false"));
        let mut endpoint = connector
            .connect(&url, &Configuration::default(), &context())
            .await
            .expect("connect");
        assert!(root.is_dir());
        assert_eq!(endpoint.url(), &url);
        endpoint.shutdown().await.expect("shutdown");
    }
}
