//! Session creation protocol.
//!
//! ```text
//! client → CreateRequest { alpha, beta, configuration }
//! server → CreateResponse { challenge }      ┐ zero or more rounds
//! client → CreateRequest { response }        ┘
//! server → CreateResponse { error }          (failure, nothing persisted)
//!        | CreateResponse { session }        (success)
//! ```
//!
//! Problems with the session itself (configuration, authentication,
//! endpoints) are reported in-band through `error`. A broken or misused
//! stream is a transport error and ends the attempt without a session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_core::{Configuration, SessionId, Url};
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::PromptContext;
use crate::error::DaemonError;
use crate::prompt::{Challenge, PromptResponse, Prompter};
use crate::rpc::{Client, Opener, Stream};
use crate::session::SessionService;

pub const METHOD_CREATE: &str = "session.Create";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<PromptResponse>,
}

impl CreateRequest {
    pub fn initial(alpha: Url, beta: Url, configuration: Configuration) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            configuration: Some(configuration),
            response: None,
        }
    }

    pub fn answer(text: String) -> Self {
        Self {
            response: Some(PromptResponse { text }),
            ..Self::default()
        }
    }

    fn is_initial(&self) -> bool {
        self.alpha.is_some() && self.beta.is_some() && self.response.is_none()
    }

    fn is_answer(&self) -> bool {
        self.response.is_some()
            && self.alpha.is_none()
            && self.beta.is_none()
            && self.configuration.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

impl CreateResponse {
    fn challenge(challenge: Challenge) -> Self {
        Self {
            challenge: Some(challenge),
            ..Self::default()
        }
    }

    fn failure(error: String) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }

    fn success(session: SessionId) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Where the server is in one creation exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateState {
    AwaitingInitial,
    Establishing,
    AwaitingChallengeAnswer,
    Terminal,
}

impl CreateState {
    /// Transition on an incoming request.
    fn on_request(self, request: &CreateRequest) -> Result<Self, DaemonError> {
        match self {
            Self::AwaitingInitial if request.is_initial() => Ok(Self::Establishing),
            Self::AwaitingInitial => Err(DaemonError::Protocol(
                "initial create request must carry both endpoint URLs and no response".into(),
            )),
            Self::AwaitingChallengeAnswer if request.is_answer() => Ok(Self::Establishing),
            Self::AwaitingChallengeAnswer => Err(DaemonError::Protocol(
                "expected a challenge response".into(),
            )),
            Self::Establishing | Self::Terminal => Err(DaemonError::Protocol(format!(
                "unexpected create request while {self:?}"
            ))),
        }
    }

    /// Transition on an outgoing challenge.
    fn on_challenge(self) -> Result<Self, DaemonError> {
        match self {
            Self::Establishing => Ok(Self::AwaitingChallengeAnswer),
            other => Err(DaemonError::Protocol(format!(
                "cannot issue a challenge while {other:?}"
            ))),
        }
    }

    /// Transition on the terminal response.
    fn on_outcome(self) -> Result<Self, DaemonError> {
        match self {
            Self::Establishing => Ok(Self::Terminal),
            other => Err(DaemonError::Protocol(format!(
                "cannot finish creation while {other:?}"
            ))),
        }
    }
}

struct PendingPrompt {
    challenge: Challenge,
    reply: oneshot::Sender<String>,
}

/// Turns endpoint prompts into challenges on the creation stream.
struct StreamPrompter {
    pending: mpsc::Sender<PendingPrompt>,
}

#[async_trait]
impl Prompter for StreamPrompter {
    async fn prompt(&self, challenge: Challenge) -> Result<String, DaemonError> {
        let (reply, answer) = oneshot::channel();
        self.pending
            .send(PendingPrompt { challenge, reply })
            .await
            .map_err(|_| DaemonError::ChannelClosed("creation stream"))?;
        answer
            .await
            .map_err(|_| DaemonError::Prompt("creation stream closed before the challenge was answered".into()))
    }
}

/// Run one `session.Create` exchange on `stream`.
pub(crate) async fn serve_create(
    sessions: &SessionService,
    mut stream: Stream,
) -> Result<(), DaemonError> {
    let mut state = CreateState::AwaitingInitial;

    let request: CreateRequest = stream.receive().await?;
    state = state.on_request(&request)?;
    let (Some(alpha), Some(beta)) = (request.alpha, request.beta) else {
        return Err(DaemonError::Protocol("create request is missing an endpoint".into()));
    };
    let configuration = request.configuration.unwrap_or_default();

    let (pending_tx, mut pending_rx) = mpsc::channel(1);
    let prompter: Arc<dyn Prompter> = Arc::new(StreamPrompter {
        pending: pending_tx,
    });
    let guard = sessions.prompts().register(prompter.clone());
    let context = PromptContext {
        id: guard.id().to_string(),
        prompter,
    };

    let establish = sessions.establish(alpha, beta, configuration, context);
    tokio::pin!(establish);

    let response = loop {
        tokio::select! {
            outcome = &mut establish => {
                state = state.on_outcome()?;
                break match outcome {
                    Ok(id) => CreateResponse::success(id),
                    Err(err) => {
                        tracing::warn!(error = %err, "session creation failed");
                        CreateResponse::failure(err.to_string())
                    }
                };
            }
            Some(pending) = pending_rx.recv() => {
                state = state.on_challenge()?;
                stream.send(&CreateResponse::challenge(pending.challenge)).await?;

                let answer: CreateRequest = stream.receive().await?;
                state = state.on_request(&answer)?;
                let text = answer.response.map(|r| r.text).unwrap_or_default();
                // The prompting endpoint may have given up in the meantime.
                let _ = pending.reply.send(text);
            }
            // Nothing may arrive while endpoints connect; a hangup cancels
            // the establishment.
            incoming = stream.receive::<CreateRequest>() => {
                let request = incoming?;
                state = state.on_request(&request)?;
            }
        }
    };

    drop(guard);
    debug_assert_eq!(state, CreateState::Terminal);
    if let Err(err) = stream.send(&response).await {
        if let Some(id) = &response.session {
            tracing::warn!(session = %id, error = %err, "creation result undeliverable, discarding session");
            if let Err(rollback) = sessions.terminate(id).await {
                tracing::warn!(session = %id, error = %rollback, "failed to discard session");
            }
        }
        return Err(err);
    }
    stream.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Create a session, answering challenges with `prompter`.
pub async fn create_session<O: Opener>(
    client: &Client<O>,
    alpha: Url,
    beta: Url,
    configuration: Configuration,
    prompter: &dyn Prompter,
) -> Result<SessionId, DaemonError> {
    let mut stream = client.invoke(METHOD_CREATE).await?;
    stream
        .send(&CreateRequest::initial(alpha, beta, configuration))
        .await?;

    loop {
        let response: CreateResponse = match stream.receive().await {
            Ok(response) => response,
            Err(DaemonError::StreamClosed) => {
                return Err(DaemonError::Protocol(
                    "daemon closed the creation stream".into(),
                ))
            }
            Err(err) => return Err(err),
        };

        if let Some(challenge) = response.challenge {
            if !response.error.is_empty() || response.session.is_some() {
                stream.close().await;
                return Err(DaemonError::Protocol(
                    "challenge combined with a terminal response".into(),
                ));
            }
            let text = match prompter.prompt(challenge).await {
                Ok(text) => text,
                Err(err) => {
                    stream.close().await;
                    return Err(err);
                }
            };
            stream.send(&CreateRequest::answer(text)).await?;
            continue;
        }

        stream.close().await;
        if !response.error.is_empty() {
            return Err(DaemonError::CreateFailed(response.error));
        }
        return response
            .session
            .ok_or_else(|| DaemonError::Protocol("successful creation without a session id".into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, EndpointConnector};
    use crate::prompt::PromptService;
    use crate::rpc::stream_pair;
    use std::time::Duration;
    use tandem_core::store;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn initial() -> CreateRequest {
        CreateRequest::initial(Url::local("/a"), Url::local("/b"), Configuration::default())
    }

    #[test]
    fn happy_path_transitions() {
        let state = CreateState::AwaitingInitial;
        let state = state.on_request(&initial()).expect("initial");
        assert_eq!(state, CreateState::Establishing);
        let state = state.on_challenge().expect("challenge");
        assert_eq!(state, CreateState::AwaitingChallengeAnswer);
        let state = state
            .on_request(&CreateRequest::answer("pw".into()))
            .expect("answer");
        assert_eq!(state, CreateState::Establishing);
        assert_eq!(state.on_outcome().expect("outcome"), CreateState::Terminal);
    }

    #[test]
    fn answer_before_initial_is_a_violation() {
        let err = CreateState::AwaitingInitial
            .on_request(&CreateRequest::answer("pw".into()))
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn new_request_during_challenge_is_a_violation() {
        let err = CreateState::AwaitingChallengeAnswer
            .on_request(&initial())
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn initial_without_beta_is_a_violation() {
        let mut request = initial();
        request.beta = None;
        assert!(CreateState::AwaitingInitial.on_request(&request).is_err());
    }

    #[test]
    fn terminal_state_accepts_nothing() {
        assert!(CreateState::Terminal.on_request(&initial()).is_err());
        assert!(CreateState::Terminal.on_challenge().is_err());
        assert!(CreateState::AwaitingChallengeAnswer.on_outcome().is_err());
    }

    #[test]
    fn wire_shapes_omit_empty_fields() {
        let success = serde_json::to_value(CreateResponse::success(SessionId::from("s1")))
            .expect("serialize");
        assert_eq!(success, serde_json::json!({ "session": "s1" }));

        let answer = serde_json::to_value(CreateRequest::answer("pw".into())).expect("serialize");
        assert_eq!(answer, serde_json::json!({ "response": { "text": "pw" } }));
    }

    /// Never finishes connecting and never prompts.
    struct StalledConnector {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl EndpointConnector for StalledConnector {
        async fn connect(
            &self,
            _url: &Url,
            _configuration: &Configuration,
            _prompt: &PromptContext,
        ) -> Result<Box<dyn Endpoint>, DaemonError> {
            self.started.notify_one();
            std::future::pending().await
        }
    }

    fn stalled_service(home: &TempDir) -> (Arc<SessionService>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let service = SessionService::load(
            home.path().to_path_buf(),
            Arc::new(PromptService::new()),
            Arc::new(StalledConnector {
                started: started.clone(),
            }),
        )
        .expect("load");
        (Arc::new(service), started)
    }

    #[tokio::test]
    async fn hangup_while_connecting_cancels_creation() {
        let home = TempDir::new().expect("home");
        let (sessions, started) = stalled_service(&home);
        let (mut client, server_side) = stream_pair();
        let server = {
            let sessions = sessions.clone();
            tokio::spawn(async move { serve_create(&sessions, server_side).await })
        };

        client.send(&initial()).await.expect("send");
        started.notified().await;
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("hangup noticed")
            .expect("join");
        assert!(matches!(result, Err(DaemonError::StreamClosed)), "got: {result:?}");
        assert!(sessions.list().await.is_empty());
        assert!(store::list_sessions_at(home.path()).expect("records").is_empty());
    }

    #[tokio::test]
    async fn request_while_connecting_is_a_violation() {
        let home = TempDir::new().expect("home");
        let (sessions, started) = stalled_service(&home);
        let (mut client, server_side) = stream_pair();
        let server = {
            let sessions = sessions.clone();
            tokio::spawn(async move { serve_create(&sessions, server_side).await })
        };

        client.send(&initial()).await.expect("send");
        started.notified().await;
        client
            .send(&CreateRequest::answer("unprompted".into()))
            .await
            .expect("send answer");

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("violation noticed")
            .expect("join");
        assert!(matches!(result, Err(DaemonError::Protocol(_))), "got: {result:?}");
        assert!(store::list_sessions_at(home.path()).expect("records").is_empty());
    }
}
