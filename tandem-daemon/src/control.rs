//! Daemon lifecycle control over RPC.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DaemonError;
use crate::rpc::{Client, Opener, Service, Stream};

pub const METHOD_TERMINATE: &str = "daemon.Terminate";

/// Serves `daemon.Terminate` by signalling the runtime's termination channel.
pub struct DaemonService {
    terminate: mpsc::Sender<()>,
}

impl DaemonService {
    /// Returns the service and the receiver the runtime waits on.
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (terminate, requests) = mpsc::channel(1);
        (Self { terminate }, requests)
    }
}

#[async_trait]
impl Service for DaemonService {
    fn methods(&self) -> &'static [&'static str] {
        &[METHOD_TERMINATE]
    }

    async fn handle(&self, _method: &str, mut stream: Stream) -> Result<(), DaemonError> {
        // A full channel means termination is already under way.
        let _ = self.terminate.try_send(());
        tracing::info!("termination requested over rpc");
        stream.close().await;
        Ok(())
    }
}

/// Ask a running daemon to shut down.
pub async fn request_terminate<O: Opener>(client: &Client<O>) -> Result<(), DaemonError> {
    let mut stream = client.invoke(METHOD_TERMINATE).await?;
    stream.close().await;
    Ok(())
}
