//! Execute listeners with broadcast and history.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use futures::StreamExt;
use remote_pipeline_core::{ExecutionRecord, SessionConfig};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Observer of executed statements.
pub trait ExecuteListener: Send + Sync {
    fn on_execute(&self, record: &ExecutionRecord);
}

impl<F> ExecuteListener for F
where
    F: Fn(&ExecutionRecord) + Send + Sync,
{
    fn on_execute(&self, record: &ExecutionRecord) {
        self(record);
    }
}

struct Inner {
    listeners: Vec<Arc<dyn ExecuteListener>>,
    history: VecDeque<ExecutionRecord>,
}

/// Per-session listener set.
///
/// Besides callback listeners, every record is kept in a bounded history
/// and broadcast live, so diagnostics that attach late can replay what
/// they missed and then follow along.
pub struct ListenerRegistry {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ExecutionRecord>,
    history_limit: usize,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl ListenerRegistry {
    /// Create an empty registry sized from `config`.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        let (sender, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            inner: RwLock::new(Inner {
                listeners: Vec::new(),
                history: VecDeque::with_capacity(config.listener_history.min(32)),
            }),
            sender,
            history_limit: config.listener_history,
        }
    }

    /// Register a listener for every subsequent record.
    pub fn add(&self, listener: impl ExecuteListener + 'static) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .push(Arc::new(listener));
    }

    /// Number of registered callback listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all listeners and history.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.clear();
        inner.history.clear();
    }

    /// Deliver a record to history, live subscribers and every listener.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn notify(&self, record: &ExecutionRecord) {
        let listeners = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if self.history_limit > 0 {
                while inner.history.len() >= self.history_limit {
                    inner.history.pop_front();
                }
                inner.history.push_back(record.clone());
            }
            // Sent under the lock so `subscribe` never sees a record twice.
            let _ = self.sender.send(record.clone());
            inner.listeners.clone()
        };

        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_execute(record))).is_err() {
                tracing::warn!(listener = index, code = %record.code, "Execute listener panicked");
            }
        }
    }

    /// Snapshot of the retained records, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields retained history first, then live records.
    #[must_use]
    pub fn subscribe(&self) -> futures::stream::BoxStream<'static, ExecutionRecord> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            (
                inner.history.iter().cloned().collect::<Vec<_>>(),
                self.sender.subscribe(),
            )
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            if let Err(e) = &res {
                tracing::warn!("Record subscriber lagged: {e}");
            }
            res.ok()
        });

        Box::pin(hist.chain(live))
    }
}
