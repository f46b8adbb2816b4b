//! Session management service.
//!
//! Owns every session known to the daemon. Sessions created while the daemon
//! runs hold live endpoints; sessions reloaded from disk at startup are
//! listed as disconnected until terminated.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_core::{
    global, store, Configuration, ConfigurationSource, Session, SessionId, Url,
};
use tokio::sync::{Mutex, RwLock};

use crate::create::{serve_create, METHOD_CREATE};
use crate::endpoint::{Endpoint, EndpointConnector, PromptContext};
use crate::error::DaemonError;
use crate::prompt::PromptService;
use crate::rpc::{Client, Opener, Service, Stream};

pub const METHOD_LIST: &str = "session.List";
pub const METHOD_TERMINATE_SESSION: &str = "session.Terminate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connected,
    Disconnected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: Session,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub sessions: Vec<SessionState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateRequest {
    pub session: SessionId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminateResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct SessionController {
    session: Session,
    alpha: Option<Box<dyn Endpoint>>,
    beta: Option<Box<dyn Endpoint>>,
}

impl SessionController {
    fn status(&self) -> SessionStatus {
        if self.alpha.is_some() && self.beta.is_some() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        }
    }

    /// Close both endpoints. Failures are logged; the endpoints are gone
    /// either way.
    async fn halt(&mut self) {
        for endpoint in [self.alpha.take(), self.beta.take()].into_iter().flatten() {
            close_endpoint(endpoint).await;
        }
    }
}

async fn close_endpoint(mut endpoint: Box<dyn Endpoint>) {
    if let Err(err) = endpoint.shutdown().await {
        tracing::warn!(url = %endpoint.url(), error = %err, "endpoint shutdown failed");
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Serves `session.Create`, `session.List` and `session.Terminate`.
pub struct SessionService {
    home: PathBuf,
    prompts: Arc<PromptService>,
    connector: Arc<dyn EndpointConnector>,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionController>>>>,
}

impl SessionService {
    /// Build the service, reloading persisted session records as
    /// disconnected sessions.
    pub fn load(
        home: PathBuf,
        prompts: Arc<PromptService>,
        connector: Arc<dyn EndpointConnector>,
    ) -> Result<Self, DaemonError> {
        let persisted = store::list_sessions_at(&home)?;
        tracing::info!(count = persisted.len(), "loaded persisted sessions");

        let sessions = persisted
            .into_iter()
            .map(|session| {
                let id = session.id.clone();
                let controller = SessionController {
                    session,
                    alpha: None,
                    beta: None,
                };
                (id, Arc::new(Mutex::new(controller)))
            })
            .collect();

        Ok(Self {
            home,
            prompts,
            connector,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn prompts(&self) -> &Arc<PromptService> {
        &self.prompts
    }

    /// Validate, resolve configuration, connect both endpoints and persist a
    /// new session. Every error returned here belongs in the creation
    /// response's `error` field.
    pub(crate) async fn establish(
        &self,
        alpha: Url,
        beta: Url,
        configuration: Configuration,
        prompt: PromptContext,
    ) -> Result<SessionId, DaemonError> {
        configuration.ensure_valid(ConfigurationSource::Create)?;

        let home = self.home.clone();
        let global = tokio::task::spawn_blocking(move || global::load_global_at(&home))
            .await
            .map_err(|err| DaemonError::Protocol(format!("global configuration task failed: {err}")))??;
        let effective = Configuration::merge(&configuration, &global);

        let alpha_endpoint = self.connector.connect(&alpha, &effective, &prompt).await?;
        let beta_endpoint = match self.connector.connect(&beta, &effective, &prompt).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                close_endpoint(alpha_endpoint).await;
                return Err(err);
            }
        };

        let session = Session::new(alpha, beta, configuration);
        let id = session.id.clone();

        // Persist under the map lock so a record on disk always has a
        // controller in memory.
        let mut sessions = self.sessions.write().await;
        if let Err(err) = store::save_session_at(&self.home, &session) {
            drop(sessions);
            close_endpoint(alpha_endpoint).await;
            close_endpoint(beta_endpoint).await;
            return Err(err.into());
        }
        tracing::info!(session = %id, alpha = %session.alpha, beta = %session.beta, "session created");
        let controller = SessionController {
            session,
            alpha: Some(alpha_endpoint),
            beta: Some(beta_endpoint),
        };
        sessions.insert(id.clone(), Arc::new(Mutex::new(controller)));
        Ok(id)
    }

    /// Snapshot of every session, oldest first.
    pub async fn list(&self) -> Vec<SessionState> {
        let controllers: Vec<_> = self.sessions.read().await.values().cloned().collect();

        let mut states = Vec::with_capacity(controllers.len());
        for controller in controllers {
            let controller = controller.lock().await;
            states.push(SessionState {
                session: controller.session.clone(),
                status: controller.status(),
            });
        }
        states.sort_by(|a, b| {
            a.session
                .created_at
                .cmp(&b.session.created_at)
                .then_with(|| a.session.id.cmp(&b.session.id))
        });
        states
    }

    /// Close a session's endpoints and delete its record.
    pub async fn terminate(&self, id: &SessionId) -> Result<(), DaemonError> {
        let controller = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DaemonError::UnknownSession(id.clone()))?;

        controller.lock().await.halt().await;
        store::remove_session_at(&self.home, id)?;
        tracing::info!(session = %id, "session terminated");
        Ok(())
    }

    /// Close every live endpoint. Records stay on disk.
    pub async fn shutdown(&self) {
        let controllers: Vec<_> = self.sessions.write().await.drain().collect();
        for (id, controller) in controllers {
            controller.lock().await.halt().await;
            tracing::debug!(session = %id, "session halted");
        }
    }
}

#[async_trait]
impl Service for SessionService {
    fn methods(&self) -> &'static [&'static str] {
        &[METHOD_CREATE, METHOD_LIST, METHOD_TERMINATE_SESSION]
    }

    async fn handle(&self, method: &str, mut stream: Stream) -> Result<(), DaemonError> {
        match method {
            METHOD_CREATE => serve_create(self, stream).await,
            METHOD_LIST => {
                let response = ListResponse {
                    sessions: self.list().await,
                };
                stream.send(&response).await?;
                stream.close().await;
                Ok(())
            }
            METHOD_TERMINATE_SESSION => {
                let request: TerminateRequest = stream.receive().await?;
                let error = match self.terminate(&request.session).await {
                    Ok(()) => String::new(),
                    Err(err) => {
                        tracing::warn!(session = %request.session, error = %err, "session termination failed");
                        err.to_string()
                    }
                };
                stream.send(&TerminateResponse { error }).await?;
                stream.close().await;
                Ok(())
            }
            other => Err(DaemonError::Protocol(format!(
                "session service cannot handle '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

pub async fn list_sessions<O: Opener>(client: &Client<O>) -> Result<Vec<SessionState>, DaemonError> {
    let mut stream = client.invoke(METHOD_LIST).await?;
    let response: ListResponse = stream.receive().await?;
    stream.close().await;
    Ok(response.sessions)
}

pub async fn terminate_session<O: Opener>(
    client: &Client<O>,
    id: &SessionId,
) -> Result<(), DaemonError> {
    let mut stream = client.invoke(METHOD_TERMINATE_SESSION).await?;
    stream
        .send(&TerminateRequest {
            session: id.clone(),
        })
        .await?;
    let response: TerminateResponse = stream.receive().await?;
    stream.close().await;
    if !response.error.is_empty() {
        return Err(DaemonError::TerminateFailed(response.error));
    }
    Ok(())
}
