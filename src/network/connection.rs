//! Duplex connection to the agent bridge
//!
//! The write half is owned by a single actor task; every loop that needs
//! to write sends it a request and waits for the acknowledgement, so at
//! most one write is ever in flight. The read half belongs to the receive
//! loop alone.

use futures_util::{Sink, SinkExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::NetworkError;
use crate::protocol::ClientMessage;

/// Client WebSocket stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending writes buffered ahead of the actor
const WRITE_QUEUE_DEPTH: usize = 32;

/// Open the WebSocket, failing after `timeout`
pub async fn connect(url: &str, timeout: Duration) -> Result<WsStream, NetworkError> {
    let (stream, _) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    tracing::info!("Connected to {}", url);
    Ok(stream)
}

enum WriteRequest {
    Text {
        text: String,
        ack: oneshot::Sender<Result<(), NetworkError>>,
    },
    Close,
}

/// Handle to the write-owning actor
#[derive(Clone)]
pub struct ConnectionWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl ConnectionWriter {
    /// Spawn the actor around the sink half of a connection
    pub fn spawn<S>(sink: S) -> (Self, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let handle = tokio::spawn(write_loop(sink, rx));
        (Self { tx }, handle)
    }

    /// Write one message and wait until the transport accepted it
    pub async fn send(&self, message: &ClientMessage) -> Result<(), NetworkError> {
        let text = message
            .to_json()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest::Text { text, ack })
            .await
            .map_err(|_| NetworkError::Closed)?;

        done.await.map_err(|_| NetworkError::Closed)?
    }

    /// [`send`](Self::send) bounded by `timeout`.
    ///
    /// On timeout the write may still complete later; it stays ordered
    /// ahead of anything sent afterwards.
    pub async fn send_timeout(
        &self,
        message: &ClientMessage,
        timeout: Duration,
    ) -> Result<(), NetworkError> {
        tokio::time::timeout(timeout, self.send(message))
            .await
            .map_err(|_| NetworkError::Timeout)?
    }

    /// Ask the actor to close the sink and exit after pending writes
    pub async fn close(&self) {
        let _ = self.tx.send(WriteRequest::Close).await;
    }

    /// Close and wait for the actor to exit, at most `timeout`.
    ///
    /// A peer that stopped reading can leave the actor stuck inside a
    /// write; it is aborted once the timeout passes. Returns `true` if the
    /// actor exited on its own.
    pub async fn shutdown(&self, mut task: JoinHandle<()>, timeout: Duration) -> bool {
        let closed = tokio::time::timeout(timeout, async {
            self.close().await;
            let _ = (&mut task).await;
        })
        .await;

        if closed.is_err() {
            tracing::warn!("Connection writer stalled, aborting");
            task.abort();
            let _ = task.await;
            return false;
        }
        true
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<WriteRequest>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut written = 0u64;

    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Text { text, ack } => {
                let result = sink
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| NetworkError::SendFailed(e.to_string()));
                if result.is_ok() {
                    written += 1;
                }
                let _ = ack.send(result);
            }
            WriteRequest::Close => break,
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Closing connection: {}", e);
    }
    tracing::debug!("Connection writer exited after {} messages", written);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::Arc;

    fn recording_sink(
        log: Arc<Mutex<Vec<String>>>,
    ) -> impl Sink<Message, Error = Infallible> + Unpin + Send + 'static {
        Box::pin(futures_util::sink::unfold(log, |log, message: Message| async move {
            if let Message::Text(text) = message {
                log.lock().push(text);
            }
            Ok::<_, Infallible>(log)
        }))
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (writer, handle) = ConnectionWriter::spawn(recording_sink(log.clone()));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..10 {
                    let message = ClientMessage::ToolResponse {
                        call_id: format!("{}-{}", i, n),
                        result: String::new(),
                    };
                    writer.send(&message).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        writer.close().await;
        handle.await.unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 30);
        // Each writer's own messages keep their order
        for i in 0..3 {
            let ids: Vec<String> = log
                .iter()
                .map(|t| serde_json::from_str::<serde_json::Value>(t).unwrap())
                .map(|v| v["payload"]["callId"].as_str().unwrap().to_string())
                .filter(|id| id.starts_with(&format!("{}-", i)))
                .collect();
            let expected: Vec<String> = (0..10).map(|n| format!("{}-{}", i, n)).collect();
            assert_eq!(ids, expected);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (writer, handle) = ConnectionWriter::spawn(recording_sink(log));
        writer.close().await;
        handle.await.unwrap();

        let result = writer.send(&ClientMessage::StopSession {}).await;
        assert!(matches!(result, Err(NetworkError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_with_stalled_peer_is_bounded() {
        // Accepts nothing: every write hangs
        let stalled = Box::pin(futures_util::sink::unfold((), |_, _message: Message| {
            futures_util::future::pending::<Result<(), Infallible>>()
        }));
        let (writer, handle) = ConnectionWriter::spawn(stalled);

        let mut timed_out = 0;
        for _ in 0..40 {
            let result = writer
                .send_timeout(&ClientMessage::StopSession {}, Duration::from_millis(5))
                .await;
            if matches!(result, Err(NetworkError::Timeout)) {
                timed_out += 1;
            }
        }
        assert_eq!(timed_out, 40);

        let exited = tokio::time::timeout(
            Duration::from_secs(3),
            writer.shutdown(handle, Duration::from_millis(100)),
        )
        .await
        .expect("shutdown hung on a stalled peer");
        assert!(!exited);

        // The actor is gone; later writes fail fast
        let result = writer.send(&ClientMessage::StopSession {}).await;
        assert!(matches!(result, Err(NetworkError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_of_healthy_writer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (writer, handle) = ConnectionWriter::spawn(recording_sink(log.clone()));
        writer.send(&ClientMessage::StopSession {}).await.unwrap();

        assert!(writer.shutdown(handle, Duration::from_secs(1)).await);
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{}", addr), Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
