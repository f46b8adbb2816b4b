//! Credential prompt relay.
//!
//! While a session is being created, the remote transport may need a
//! password or a host-key confirmation. The session service registers a
//! [`Prompter`] for the lifetime of the creation stream; the transport's
//! askpass helper reaches it by id through the `prompt.Prompt` method and
//! the answer travels back the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::rpc::{Client, Opener, Service, Stream};

pub const METHOD_PROMPT: &str = "prompt.Prompt";

/// A question that must be answered before an operation can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Informational text shown before the prompt. May be empty.
    #[serde(default)]
    pub message: String,
    /// The question itself, e.g. `user@host's password:`.
    pub prompt: String,
}

/// The user's answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub text: String,
}

/// Something that can answer challenges.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, challenge: Challenge) -> Result<String, DaemonError>;
}

/// Request sent by the askpass helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompter: String,
    #[serde(default)]
    pub message: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptReply {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub response: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of live prompters, served under `prompt.Prompt`.
#[derive(Default)]
pub struct PromptService {
    next_id: AtomicU64,
    prompters: Mutex<HashMap<String, Arc<dyn Prompter>>>,
}

impl PromptService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `prompter`; it stays reachable until the guard drops.
    pub fn register(self: &Arc<Self>, prompter: Arc<dyn Prompter>) -> PrompterGuard {
        let serial = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{serial}", std::process::id());
        self.registry().insert(id.clone(), prompter);
        tracing::debug!(prompter = %id, "prompter registered");
        PrompterGuard {
            id,
            service: Arc::clone(self),
        }
    }

    /// Forward `challenge` to the prompter registered under `id`.
    pub async fn prompt(&self, id: &str, challenge: Challenge) -> Result<String, DaemonError> {
        let prompter = self.registry().get(id).cloned();
        match prompter {
            Some(prompter) => prompter.prompt(challenge).await,
            None => Err(DaemonError::Prompt(format!("unknown prompter '{id}'"))),
        }
    }

    fn unregister(&self, id: &str) {
        self.registry().remove(id);
        tracing::debug!(prompter = %id, "prompter unregistered");
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Prompter>>> {
        self.prompters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a prompter registered. Dropping it unregisters the prompter.
pub struct PrompterGuard {
    id: String,
    service: Arc<PromptService>,
}

impl PrompterGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PrompterGuard {
    fn drop(&mut self) {
        self.service.unregister(&self.id);
    }
}

#[async_trait]
impl Service for PromptService {
    fn methods(&self) -> &'static [&'static str] {
        &[METHOD_PROMPT]
    }

    async fn handle(&self, _method: &str, mut stream: Stream) -> Result<(), DaemonError> {
        let request: PromptRequest = stream.receive().await?;
        let challenge = Challenge {
            message: request.message,
            prompt: request.prompt,
        };
        let reply = match self.prompt(&request.prompter, challenge).await {
            Ok(response) => PromptReply {
                error: String::new(),
                response,
            },
            Err(err) => {
                tracing::warn!(prompter = %request.prompter, error = %err, "prompt relay failed");
                PromptReply {
                    error: err.to_string(),
                    response: String::new(),
                }
            }
        };
        stream.send(&reply).await?;
        stream.close().await;
        Ok(())
    }
}

/// Ask the daemon to route a challenge to prompter `id` and return the answer.
pub async fn relay_prompt<O: Opener>(
    client: &Client<O>,
    id: &str,
    challenge: Challenge,
) -> Result<String, DaemonError> {
    let mut stream = client.invoke(METHOD_PROMPT).await?;
    stream
        .send(&PromptRequest {
            prompter: id.to_string(),
            message: challenge.message,
            prompt: challenge.prompt,
        })
        .await?;
    let reply: PromptReply = stream.receive().await?;
    stream.close().await;
    if !reply.error.is_empty() {
        return Err(DaemonError::Prompt(reply.error));
    }
    Ok(reply.response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{stream_pair, Server};

    struct Fixed(&'static str);

    #[async_trait]
    impl Prompter for Fixed {
        async fn prompt(&self, challenge: Challenge) -> Result<String, DaemonError> {
            Ok(format!("{} {}", self.0, challenge.prompt))
        }
    }

    struct Direct(Arc<Server>);

    #[async_trait]
    impl Opener for Direct {
        async fn open(&self) -> Result<Stream, DaemonError> {
            let (client, server_side) = stream_pair();
            let server = self.0.clone();
            tokio::spawn(async move {
                let _ = server.dispatch(server_side).await;
            });
            Ok(client)
        }
    }

    fn challenge() -> Challenge {
        Challenge {
            message: String::new(),
            prompt: "password:".into(),
        }
    }

    #[tokio::test]
    async fn relays_to_registered_prompter() {
        let prompts = Arc::new(PromptService::new());
        let guard = prompts.register(Arc::new(Fixed("hunter2")));

        let mut server = Server::new();
        server.register(prompts.clone()).expect("register");
        let client = Client::new(Direct(Arc::new(server)));

        let answer = relay_prompt(&client, guard.id(), challenge())
            .await
            .expect("relay");
        assert_eq!(answer, "hunter2 password:");
    }

    #[tokio::test]
    async fn dropped_guard_makes_prompter_unreachable() {
        let prompts = Arc::new(PromptService::new());
        let id = {
            let guard = prompts.register(Arc::new(Fixed("x")));
            guard.id().to_string()
        };
        let err = prompts.prompt(&id, challenge()).await.unwrap_err();
        assert!(err.to_string().contains("unknown prompter"), "got: {err}");
    }

    #[test]
    fn ids_are_unique() {
        let prompts = Arc::new(PromptService::new());
        let a = prompts.register(Arc::new(Fixed("a")));
        let b = prompts.register(Arc::new(Fixed("b")));
        assert_ne!(a.id(), b.id());
    }
}
