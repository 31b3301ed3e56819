//! Request-tagging peer speaking the wire protocol.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use remote_pipeline_core::{Engine, EngineError, ExecuteReply};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::oneshot,
};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage, encode_line};

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Kernel disconnected")]
    Disconnected,
    #[error("Kernel command cannot be parsed: {0}")]
    InvalidCommand(String),
    #[error("Kernel command is empty")]
    EmptyCommand,
    #[error("No kernel command configured")]
    NoKernelCommand,
    #[error("Spawn failed: {0}")]
    Spawn(String),
}

impl From<TransportError> for EngineError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Disconnected => Self::Disconnected,
            TransportError::Json(e) => Self::Protocol(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Waiters {
    connected: bool,
    replies: HashMap<Uuid, oneshot::Sender<(String, ExecuteReply)>>,
    pongs: VecDeque<oneshot::Sender<()>>,
}

/// Client side of the kernel protocol.
///
/// Every execute request carries a fresh `msg_id`; replies are routed back
/// by that id, so the kernel may answer in any order.
#[derive(Clone)]
pub struct KernelPeer {
    writer: Arc<tokio::sync::Mutex<Writer>>,
    waiters: Arc<Mutex<Waiters>>,
}

impl KernelPeer {
    /// Spawn a new peer over a byte stream pair.
    ///
    /// This starts a background task that reads kernel messages and wakes
    /// the matching waiters.
    #[must_use]
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            waiters: Arc::new(Mutex::new(Waiters {
                connected: true,
                ..Waiters::default()
            })),
        };

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = reader_peer.read_loop(reader).await {
                tracing::error!("Kernel reader loop error: {e}");
            }
            reader_peer.disconnect();
        });

        peer
    }

    /// Whether the kernel's output stream is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Send a ping and wait for the pong.
    ///
    /// # Errors
    /// Returns error if the kernel is gone or the write fails.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.lock();
            if !waiters.connected {
                return Err(TransportError::Disconnected);
            }
            waiters.pongs.push_back(tx);
        }
        self.send_json(&ClientMessage::Ping).await?;
        rx.await.map_err(|_| TransportError::Disconnected)
    }

    /// Number of execute requests still waiting for a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_loop<R>(&self, reader: R) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buffer = String::new();

        loop {
            buffer.clear();
            if reader.read_line(&mut buffer).await? == 0 {
                return Ok(()); // EOF
            }
            let line = buffer.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<ServerMessage>(line) {
                Ok(ServerMessage::ExecuteReply {
                    msg_id,
                    code,
                    status,
                    output,
                    error,
                }) => {
                    let waiter = self.lock().replies.remove(&msg_id);
                    match waiter {
                        Some(tx) => {
                            let reply = ExecuteReply {
                                status,
                                output,
                                error,
                            };
                            if tx.send((code, reply)).is_err() {
                                tracing::debug!(%msg_id, "Reply waiter dropped");
                            }
                        }
                        None => tracing::warn!(%msg_id, "Reply for unknown request"),
                    }
                }
                Ok(ServerMessage::Pong) => {
                    if let Some(tx) = self.lock().pongs.pop_front() {
                        let _ = tx.send(());
                    }
                }
                Ok(ServerMessage::Error { message }) => {
                    tracing::warn!("Kernel error: {message}");
                }
                Err(e) => {
                    tracing::warn!("Invalid kernel message: {e}");
                }
            }
        }
    }

    fn disconnect(&self) {
        let mut waiters = self.lock();
        waiters.connected = false;
        // Dropping the senders fails every outstanding request.
        waiters.replies.clear();
        waiters.pongs.clear();
        tracing::debug!("Kernel peer disconnected");
    }

    async fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let line = encode_line(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Drops the reply waiter when an execute request ends, including when the
/// caller abandons it before the kernel answers.
struct PendingReply<'a> {
    peer: &'a KernelPeer,
    msg_id: Uuid,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.peer.lock().replies.remove(&self.msg_id);
    }
}

#[async_trait]
impl Engine for KernelPeer {
    async fn execute(&self, code: &str) -> Result<ExecuteReply, EngineError> {
        let msg_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.lock();
            if !waiters.connected {
                return Err(EngineError::Disconnected);
            }
            waiters.replies.insert(msg_id, tx);
        }

        let _pending = PendingReply { peer: self, msg_id };

        let request = ClientMessage::Execute {
            msg_id,
            code: code.to_string(),
        };
        self.send_json(&request).await?;

        let (echo, reply) = rx.await.map_err(|_| EngineError::Disconnected)?;
        if echo != code {
            tracing::warn!(%msg_id, "Kernel echoed different code than submitted");
        }
        Ok(reply)
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.send_json(&ClientMessage::Interrupt)
            .await
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use remote_pipeline_core::ExecutionStatus;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    fn connect() -> (KernelPeer, BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>) {
        let (client, kernel) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (kernel_read, kernel_write) = tokio::io::split(kernel);
        (
            KernelPeer::spawn(client_read, client_write),
            BufReader::new(kernel_read),
            kernel_write,
        )
    }

    async fn next_request(reader: &mut BufReader<ReadHalf<DuplexStream>>) -> ClientMessage {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn answer(writer: &mut WriteHalf<DuplexStream>, message: &ServerMessage) {
        writer
            .write_all(encode_line(message).unwrap().as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replies_are_routed_by_id() {
        let (peer, mut reader, mut writer) = connect();

        let first = tokio::spawn({
            let peer = peer.clone();
            async move { peer.execute("var table1 = a();").await }
        });
        let ClientMessage::Execute { msg_id: id1, code: code1 } = next_request(&mut reader).await
        else {
            panic!("expected execute");
        };

        let second = tokio::spawn({
            let peer = peer.clone();
            async move { peer.execute("var table2 = b();").await }
        });
        let ClientMessage::Execute { msg_id: id2, code: code2 } = next_request(&mut reader).await
        else {
            panic!("expected execute");
        };

        // Answer the second request first.
        answer(
            &mut writer,
            &ServerMessage::reply_to(id2, code2, ExecuteReply::ok(Some(json!("b")))),
        )
        .await;
        answer(
            &mut writer,
            &ServerMessage::reply_to(id1, code1, ExecuteReply::error("nope")),
        )
        .await;

        let second = second.await.unwrap().unwrap();
        assert_eq!(second.output, Some(json!("b")));
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, ExecutionStatus::Error);
        assert_eq!(first.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_eof_fails_outstanding_requests() {
        let (peer, mut reader, writer) = connect();

        let pending = tokio::spawn({
            let peer = peer.clone();
            async move { peer.execute("x();").await }
        });
        let _ = next_request(&mut reader).await;
        drop(writer);
        drop(reader);

        assert_eq!(pending.await.unwrap().unwrap_err(), EngineError::Disconnected);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!peer.is_connected());
        assert_eq!(
            peer.execute("y();").await.unwrap_err(),
            EngineError::Disconnected
        );
        tokio_test::assert_ok!(peer.interrupt().await);
    }

    #[tokio::test]
    async fn test_ping_and_garbage_lines() {
        let (peer, mut reader, mut writer) = connect();

        let ping = tokio::spawn({
            let peer = peer.clone();
            async move { peer.ping().await }
        });
        assert_eq!(next_request(&mut reader).await, ClientMessage::Ping);

        writer.write_all(b"not json\n\n").await.unwrap();
        answer(
            &mut writer,
            &ServerMessage::Error {
                message: "warming up".to_string(),
            },
        )
        .await;
        answer(&mut writer, &ServerMessage::Pong).await;

        tokio_test::assert_ok!(ping.await.unwrap());
        assert!(peer.is_connected());
    }

    #[tokio::test]
    async fn test_abandoned_requests_release_waiters() {
        let (peer, mut reader, mut writer) = connect();

        for _ in 0..5 {
            let attempt =
                tokio::time::timeout(Duration::from_millis(5), peer.execute("x();")).await;
            assert!(attempt.is_err());
        }
        assert_eq!(peer.pending(), 0);

        // A late reply to an abandoned request is ignored.
        let ClientMessage::Execute { msg_id, code } = next_request(&mut reader).await else {
            panic!("expected execute");
        };
        answer(
            &mut writer,
            &ServerMessage::reply_to(msg_id, code, ExecuteReply::ok(None)),
        )
        .await;

        let live = tokio::spawn({
            let peer = peer.clone();
            async move { peer.execute("y();").await }
        });
        loop {
            if let ClientMessage::Execute { msg_id, code } = next_request(&mut reader).await {
                if code == "y();" {
                    answer(
                        &mut writer,
                        &ServerMessage::reply_to(msg_id, code, ExecuteReply::ok(None)),
                    )
                    .await;
                    break;
                }
            }
        }
        assert!(live.await.unwrap().is_ok());
        assert_eq!(peer.pending(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_is_forwarded() {
        let (peer, mut reader, _writer) = connect();
        peer.interrupt().await.unwrap();
        assert_eq!(next_request(&mut reader).await, ClientMessage::Interrupt);
    }
}
