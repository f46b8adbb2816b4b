//! Method-invocation RPC over the daemon socket.
//!
//! Protocol: newline-delimited JSON over a Unix domain socket, one logical
//! stream per connection.
//!
//! ```text
//! client → {"method":"session.Create"}
//! server → {}                              (accepted)
//!        | {"error":"unknown method ..."}  (rejected, connection closed)
//! ... then method-specific messages in both directions ...
//! ```
//!
//! A decode or I/O failure ends the affected stream only. The transport
//! never retries. Messages longer than [`MAX_MESSAGE_LEN`] are decode
//! failures.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

#[derive(Debug, Serialize, Deserialize)]
struct InvocationRequest {
    method: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InvocationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Longest accepted message line, newline excluded.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// A bidirectional stream of JSON messages.
pub struct Stream {
    reader: FramedRead<BoxedReader, LinesCodec>,
    writer: Option<BoxedWriter>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("writable", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_LEN)),
            writer: Some(Box::new(writer)),
        }
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Send one message.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), DaemonError> {
        let writer = self.writer.as_mut().ok_or(DaemonError::StreamClosed)?;
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');
        writer
            .write_all(&payload)
            .await
            .map_err(|e| io_err("rpc stream write", e))?;
        writer
            .flush()
            .await
            .map_err(|e| io_err("rpc stream flush", e))
    }

    /// Receive one message. A peer that hung up yields
    /// [`DaemonError::StreamClosed`].
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, DaemonError> {
        loop {
            let line = match self.reader.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(DaemonError::Protocol(format!(
                        "message exceeds {MAX_MESSAGE_LEN} bytes"
                    )))
                }
                Some(Err(LinesCodecError::Io(err))) => return Err(io_err("rpc stream read", err)),
                None => return Err(DaemonError::StreamClosed),
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map_err(|err| DaemonError::Protocol(format!("unable to decode message: {err}")));
        }
    }

    /// Shut down the sending half. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// A connected pair of in-memory streams.
pub fn stream_pair() -> (Stream, Stream) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        Stream::new(left_read, left_write),
        Stream::new(right_read, right_write),
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Opens raw connections to a daemon.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self) -> Result<Stream, DaemonError>;
}

/// Connects to the daemon socket under a home directory.
#[derive(Debug, Clone)]
pub struct UnixOpener {
    socket: PathBuf,
}

impl UnixOpener {
    pub fn new(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    pub fn with_socket(socket: PathBuf) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Opener for UnixOpener {
    async fn open(&self) -> Result<Stream, DaemonError> {
        match UnixStream::connect(&self.socket).await {
            Ok(stream) => Ok(Stream::from_unix(stream)),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotFound
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                ) =>
            {
                Err(DaemonError::DaemonNotRunning {
                    socket: self.socket.clone(),
                })
            }
            Err(err) => Err(io_err(&self.socket, err)),
        }
    }
}

/// Invokes methods on a daemon.
pub struct Client<O> {
    opener: O,
}

impl<O: Opener> Client<O> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }

    /// Open a stream bound to `method`.
    pub async fn invoke(&self, method: &str) -> Result<Stream, DaemonError> {
        let mut stream = self.opener.open().await?;
        stream
            .send(&InvocationRequest {
                method: method.to_string(),
            })
            .await?;
        let response: InvocationResponse = stream.receive().await?;
        if let Some(message) = response.error {
            stream.close().await;
            return Err(DaemonError::MethodRejected {
                method: method.to_string(),
                message,
            });
        }
        Ok(stream)
    }
}

impl Client<UnixOpener> {
    /// Client for the daemon belonging to `home`.
    pub fn for_home(home: &Path) -> Self {
        Self::new(UnixOpener::new(home))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A set of methods served by the daemon.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Method names this service handles.
    fn methods(&self) -> &'static [&'static str];

    /// Run one invocation of `method` to completion on `stream`.
    async fn handle(&self, method: &str, stream: Stream) -> Result<(), DaemonError>;
}

/// Method-name dispatch table.
#[derive(Default)]
pub struct Server {
    handlers: HashMap<&'static str, Arc<dyn Service>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method of `service`. A method name may only be
    /// registered once.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<(), DaemonError> {
        for method in service.methods() {
            if self.handlers.contains_key(method) {
                return Err(DaemonError::Protocol(format!(
                    "method '{method}' registered twice"
                )));
            }
            self.handlers.insert(method, service.clone());
        }
        Ok(())
    }

    /// Accept connections until `shutdown` fires or the listener fails,
    /// serving each on its own task.
    ///
    /// Connection tasks never outlive this call: on return every open
    /// stream has been cancelled and dropped.
    pub async fn serve(
        self: Arc<Self>,
        listener: UnixListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => break Err(io_err("daemon listener accept", err)),
                    };
                    let server = self.clone();
                    connections.spawn(async move {
                        if let Err(err) = server.dispatch(Stream::from_unix(stream)).await {
                            tracing::warn!(error = %err, "rpc stream failed");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        if !connections.is_empty() {
            tracing::info!(open = connections.len(), "cancelling open rpc streams");
        }
        connections.abort_all();
        while connections.join_next().await.is_some() {}
        result
    }

    /// Read the invocation header from `stream` and hand the stream to the
    /// matching service.
    pub async fn dispatch(&self, mut stream: Stream) -> Result<(), DaemonError> {
        let request: InvocationRequest = match stream.receive().await {
            Ok(request) => request,
            // Readiness probes connect and hang up without invoking anything.
            Err(DaemonError::StreamClosed) => return Ok(()),
            Err(err) => return Err(err),
        };
        let Some(service) = self.handlers.get(request.method.as_str()).cloned() else {
            let message = format!("unknown method '{}'", request.method);
            stream
                .send(&InvocationResponse {
                    error: Some(message.clone()),
                })
                .await?;
            stream.close().await;
            return Err(DaemonError::MethodRejected {
                method: request.method,
                message,
            });
        };

        stream.send(&InvocationResponse::default()).await?;
        tracing::debug!(method = %request.method, "dispatching rpc stream");
        service.handle(&request.method, stream).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        fn methods(&self) -> &'static [&'static str] {
            &["test.Echo"]
        }

        async fn handle(&self, _method: &str, mut stream: Stream) -> Result<(), DaemonError> {
            loop {
                let message: String = match stream.receive().await {
                    Ok(message) => message,
                    Err(DaemonError::StreamClosed) => return Ok(()),
                    Err(err) => return Err(err),
                };
                stream.send(&message).await?;
            }
        }
    }

    struct PairOpener {
        server: Arc<Server>,
    }

    #[async_trait]
    impl Opener for PairOpener {
        async fn open(&self) -> Result<Stream, DaemonError> {
            let (client, server_side) = stream_pair();
            let server = self.server.clone();
            tokio::spawn(async move {
                let _ = server.dispatch(server_side).await;
            });
            Ok(client)
        }
    }

    fn echo_client() -> Client<PairOpener> {
        let mut server = Server::new();
        server.register(Arc::new(Echo)).expect("register");
        Client::new(PairOpener {
            server: Arc::new(server),
        })
    }

    #[tokio::test]
    async fn invoke_echoes_messages_in_order() {
        let client = echo_client();
        let mut stream = client.invoke("test.Echo").await.expect("invoke");
        for word in ["one", "two", "three"] {
            assert_ok!(stream.send(&word).await);
            let echoed: String = stream.receive().await.expect("receive");
            assert_eq!(echoed, word);
        }
        stream.close().await;
        stream.close().await;
        assert!(matches!(
            stream.send(&"late").await,
            Err(DaemonError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let client = echo_client();
        let err = assert_err!(client.invoke("test.Missing").await);
        match err {
            DaemonError::MethodRejected { method, message } => {
                assert_eq!(method, "test.Missing");
                assert!(message.contains("unknown method"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_message_fails_only_that_stream() {
        let (mut raw, server_side) = stream_pair();
        let mut server = Server::new();
        server.register(Arc::new(Echo)).expect("register");
        let server = Arc::new(server);

        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.dispatch(server_side).await })
        };
        raw.send(&serde_json::json!({ "method": "test.Echo" }))
            .await
            .expect("header");
        let _: serde_json::Value = raw.receive().await.expect("accepted");
        raw.send(&42).await.expect("send non-string");

        let result = handle.await.expect("join");
        assert!(matches!(result, Err(DaemonError::Protocol(_))), "got: {result:?}");

        let client = Client::new(PairOpener { server });
        let mut stream = client.invoke("test.Echo").await.expect("second stream");
        stream.send(&"still alive").await.expect("send");
        let echoed: String = stream.receive().await.expect("receive");
        assert_eq!(echoed, "still alive");
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut server = Server::new();
        server.register(Arc::new(Echo)).expect("first");
        assert!(server.register(Arc::new(Echo)).is_err());
    }

    #[tokio::test]
    async fn oversized_message_is_a_decode_failure() {
        let (mut raw, server_side) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(server_side);
        let mut stream = Stream::new(read, write);
        tokio::spawn(async move {
            let mut line = vec![b'a'; MAX_MESSAGE_LEN + 1];
            line.push(b'\n');
            let _ = raw.write_all(&line).await;
        });

        let result = stream.receive::<String>().await;
        assert!(matches!(result, Err(DaemonError::Protocol(_))), "got: {result:?}");
    }

    #[test]
    fn stream_debug_hides_io_halves() {
        let (stream, _) = stream_pair();
        assert_eq!(format!("{stream:?}"), "Stream { writable: true, .. }");
    }

    #[tokio::test]
    async fn serve_cancels_open_streams_on_shutdown() {
        let dir = tempfile::TempDir::new().expect("dir");
        let socket = dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket).expect("bind");

        let mut server = Server::new();
        server.register(Arc::new(Echo)).expect("register");
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let serving = tokio::spawn(Arc::new(server).serve(listener, shutdown_rx));

        let client = Client::new(UnixOpener::with_socket(socket));
        let mut stream = client.invoke("test.Echo").await.expect("invoke");
        stream.send(&"ping").await.expect("send");
        let echoed: String = stream.receive().await.expect("receive");
        assert_eq!(echoed, "ping");

        shutdown_tx.send(()).expect("shutdown");
        assert_ok!(serving.await.expect("join"));

        let next = stream.receive::<String>().await;
        assert!(next.is_err(), "got: {next:?}");
    }

    #[tokio::test]
    async fn unix_opener_reports_missing_daemon() {
        let home = tempfile::TempDir::new().expect("home");
        let client = Client::for_home(home.path());
        let err = assert_err!(client.invoke("daemon.Terminate").await);
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got: {err}");
    }
}
