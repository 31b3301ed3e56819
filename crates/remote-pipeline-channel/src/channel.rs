//! Ordered submission pipe to a remote engine.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use remote_pipeline_core::{Engine, EngineError, ExecuteReply, ExecutionRecord, Statement};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::listeners::ListenerRegistry;

/// Why a statement's completion did not resolve to a successful record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("Statement failed: {}", .0.error.as_deref().unwrap_or("unknown engine error"))]
    Execution(ExecutionRecord),
    #[error("Execution channel stopped")]
    Stopped,
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ChannelError {
    /// The engine's record, when the statement actually ran.
    #[must_use]
    pub const fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            Self::Execution(record) => Some(record),
            _ => None,
        }
    }
}

type Outcome = Result<ExecutionRecord, ChannelError>;

/// Outcome of one submitted statement.
///
/// Cloning is cheap and every clone resolves to the same outcome.
#[derive(Clone)]
pub struct Completion(Shared<BoxFuture<'static, Outcome>>);

impl Completion {
    fn from_receiver(rx: oneshot::Receiver<Outcome>) -> Self {
        Self(
            async move { rx.await.unwrap_or(Err(ChannelError::Stopped)) }
                .boxed()
                .shared(),
        )
    }

    /// A completion that has already failed.
    #[must_use]
    pub fn rejected(error: ChannelError) -> Self {
        Self(futures::future::ready(Err(error)).boxed().shared())
    }

    /// The outcome if it is already known, without waiting.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.0.clone().now_or_never()
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.0.peek().is_some())
            .finish()
    }
}

struct Queued {
    seq: u64,
    statement: Statement,
    reply: oneshot::Sender<Outcome>,
}

/// FIFO pipe from callers to an engine.
///
/// A single worker task owns the queue and keeps at most one statement in
/// flight, so the engine observes effects in exactly the submission order.
/// Submitting never waits: it is a synchronous enqueue.
pub struct ExecutionChannel {
    commands: mpsc::UnboundedSender<Vec<Queued>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_seq: AtomicU64,
}

impl ExecutionChannel {
    /// Start the worker task. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(engine: Arc<dyn Engine>, listeners: Arc<ListenerRegistry>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(engine, listeners, rx, stop_rx));

        Self {
            commands,
            stop_tx: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Enqueue one statement.
    pub fn submit(&self, statement: Statement) -> Completion {
        self.submit_batch(vec![statement])
            .pop()
            .unwrap_or_else(|| Completion::rejected(ChannelError::Stopped))
    }

    /// Enqueue statements as one unit; nothing submitted concurrently can
    /// land between them.
    pub fn submit_batch(&self, statements: Vec<Statement>) -> Vec<Completion> {
        let mut batch = Vec::with_capacity(statements.len());
        let mut completions = Vec::with_capacity(statements.len());
        for statement in statements {
            let (reply, rx) = oneshot::channel();
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(seq, code = %statement.text, "Queued statement");
            batch.push(Queued {
                seq,
                statement,
                reply,
            });
            completions.push(Completion::from_receiver(rx));
        }

        if self.commands.send(batch).is_err() {
            tracing::debug!("Submission after stop; rejecting batch");
        }
        completions
    }

    /// Abandon the queue: the statement in flight and everything behind it
    /// resolve to `ChannelError::Stopped`.
    pub fn stop(&self) {
        let stop = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop {
            let _ = tx.send(());
        }
    }

    /// Whether the worker has stopped accepting statements.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait for the worker task to exit.
    pub async fn join(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Execution worker failed: {e}");
            }
        }
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    engine: Arc<dyn Engine>,
    listeners: Arc<ListenerRegistry>,
    mut rx: mpsc::UnboundedReceiver<Vec<Queued>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    'run: loop {
        let batch = tokio::select! {
            biased;
            _ = &mut stop_rx => break 'run,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break 'run,
            },
        };

        let mut items = batch.into_iter();
        while let Some(item) = items.next() {
            let code = item.statement.text.clone();
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    tracing::debug!(seq = item.seq, "Abandoning statement in flight");
                    reject(item);
                    items.for_each(reject);
                    break 'run;
                }
                reply = engine.execute(&code) => {
                    finish(&listeners, item, reply);
                }
            }
        }
    }

    rx.close();
    while let Ok(batch) = rx.try_recv() {
        batch.into_iter().for_each(reject);
    }
    tracing::debug!("Execution worker stopped");
}

fn finish(
    listeners: &ListenerRegistry,
    item: Queued,
    reply: Result<ExecuteReply, EngineError>,
) {
    let Queued {
        seq,
        statement,
        reply: waiter,
    } = item;

    let outcome = match reply {
        Ok(reply) => {
            let record = reply.into_record(statement.text);
            listeners.notify(&record);
            if record.is_ok() {
                tracing::debug!(seq, "Statement executed");
                Ok(record)
            } else {
                tracing::debug!(seq, error = ?record.error, "Statement failed");
                Err(ChannelError::Execution(record))
            }
        }
        Err(e) => {
            tracing::error!(seq, "Engine unreachable: {e}");
            listeners.notify(&ExecutionRecord::error(statement.text, e.to_string()));
            Err(ChannelError::Engine(e))
        }
    };

    if waiter.send(outcome).is_err() {
        tracing::trace!(seq, "Completion dropped before delivery");
    }
}

fn reject(item: Queued) {
    let _ = item.reply.send(Err(ChannelError::Stopped));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_ok};

    use super::*;

    /// Engine that records what it ran and can stall or fail on demand.
    #[derive(Default)]
    struct ScriptEngine {
        ran: Mutex<Vec<String>>,
    }

    impl ScriptEngine {
        fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Engine for ScriptEngine {
        async fn execute(&self, code: &str) -> Result<ExecuteReply, EngineError> {
            // Earlier statements sleep longer, so any overlap would reorder them.
            let delay = if code.starts_with("slow") { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.ran.lock().unwrap().push(code.to_string());
            if code.contains("fail") {
                Ok(ExecuteReply::error(format!("Error running {code}")))
            } else if code.contains("hang") {
                futures::future::pending().await
            } else {
                Ok(ExecuteReply::ok(Some(json!(code.len()))))
            }
        }
    }

    fn stmt(text: &str) -> Statement {
        Statement {
            result_name: None,
            text: text.to_string(),
        }
    }

    fn setup() -> (Arc<ScriptEngine>, Arc<ListenerRegistry>, ExecutionChannel) {
        let engine = Arc::new(ScriptEngine::default());
        let listeners = Arc::new(ListenerRegistry::default());
        let channel = ExecutionChannel::spawn(
            Arc::clone(&engine) as Arc<dyn Engine>,
            Arc::clone(&listeners),
        );
        (engine, listeners, channel)
    }

    #[tokio::test]
    async fn test_fifo_despite_latency() {
        let (engine, listeners, channel) = setup();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        listeners.add(move |r: &ExecutionRecord| sink.lock().unwrap().push(r.code.clone()));

        let first = channel.submit(stmt("slow1();"));
        let second = channel.submit(stmt("fast2();"));
        let third = channel.submit(stmt("slow3();"));

        // Await out of order; effects still follow submission order.
        assert_eq!(third.await.unwrap().code, "slow3();");
        assert_eq!(second.await.unwrap().code, "fast2();");
        assert_eq!(first.await.unwrap().code, "slow1();");

        let expected = vec!["slow1();", "fast2();", "slow3();"];
        assert_eq!(engine.ran(), expected);
        assert_eq!(*order.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_submit_does_not_wait() {
        let (_engine, _listeners, channel) = setup();
        let mut completion = tokio_test::task::spawn(channel.submit(stmt("slow();")));
        assert_pending!(completion.poll());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(completion.is_woken());
        let record = assert_ready_ok!(completion.poll());
        assert_eq!(record.output, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_failure_rejects_only_that_statement() {
        let (_engine, listeners, channel) = setup();

        let completions = channel.submit_batch(vec![
            stmt("ok1();"),
            stmt("fail();"),
            stmt("ok2();"),
        ]);
        let outcomes = futures::future::join_all(completions).await;

        assert!(outcomes[0].is_ok());
        let err = outcomes[1].clone().unwrap_err();
        let record = err.record().unwrap();
        assert_eq!(record.code, "fail();");
        assert_eq!(record.error.as_deref(), Some("Error running fail();"));
        assert!(outcomes[2].is_ok());

        let statuses: Vec<_> = listeners.history().iter().map(ExecutionRecord::is_ok).collect();
        assert_eq!(statuses, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_stop_rejects_in_flight_and_queued() {
        let (engine, listeners, channel) = setup();

        let done = channel.submit(stmt("first();"));
        let hung = channel.submit(stmt("hang();"));
        let queued = channel.submit(stmt("never();"));
        assert!(done.await.is_ok());

        // Give the worker time to start the hanging statement.
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.stop();

        assert_eq!(hung.await.unwrap_err(), ChannelError::Stopped);
        assert_eq!(queued.await.unwrap_err(), ChannelError::Stopped);
        channel.join().await;

        assert!(channel.is_stopped());
        let late = channel.submit(stmt("late();"));
        assert_eq!(late.await.unwrap_err(), ChannelError::Stopped);

        assert_eq!(engine.ran(), vec!["first();", "hang();"]);
        assert_eq!(listeners.history().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_clones_share_outcome() {
        let (_engine, _listeners, channel) = setup();
        let completion = channel.submit(stmt("x();"));
        assert!(completion.try_outcome().is_none());

        let copy = completion.clone();
        let record = completion.await.unwrap();
        assert_eq!(copy.try_outcome().unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_engine_error_is_reported() {
        struct Down;

        #[async_trait]
        impl Engine for Down {
            async fn execute(&self, _code: &str) -> Result<ExecuteReply, EngineError> {
                Err(EngineError::Disconnected)
            }
        }

        let listeners = Arc::new(ListenerRegistry::default());
        let channel = ExecutionChannel::spawn(Arc::new(Down), Arc::clone(&listeners));
        let err = channel.submit(stmt("x();")).await.unwrap_err();
        assert_eq!(err, ChannelError::Engine(EngineError::Disconnected));

        let history = listeners.history();
        assert_eq!(history[0].code, "x();");
        assert_eq!(history[0].error.as_deref(), Some("Engine disconnected"));
    }
}
