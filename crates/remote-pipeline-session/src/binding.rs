//! Session binding: naming scope plus ordered channel for one engine.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use remote_pipeline_channel::{
    ChannelError, Completion, ExecuteListener, ExecutionChannel, ListenerRegistry,
};
use remote_pipeline_core::{
    Arg, BuildError, Category, Engine, Invocation, NameAllocator, Receiver, SessionConfig,
    SessionId, Statement, StatementBuilder,
};
use uuid::Uuid;

use crate::handle::Handle;

/// Session error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Session {0} is stopped")]
    Stopped(SessionId),
    #[error("Call to {method} retains no result to bind a handle to")]
    NoResult { method: String },
}

/// Statements generated for one call, with their completions in the same order.
///
/// The last entry is the call itself; earlier entries are nested
/// sub-expressions it depends on.
#[derive(Debug)]
pub struct Submitted {
    pub statements: Vec<Statement>,
    pub completions: Vec<Completion>,
}

impl Submitted {
    /// The statement for the call itself and its completion.
    #[must_use]
    pub fn outer(&self) -> Option<(&Statement, &Completion)> {
        self.statements.last().zip(self.completions.last())
    }

    fn into_outer(mut self) -> Option<(Statement, Completion)> {
        self.statements.pop().zip(self.completions.pop())
    }
}

/// Live binding to one remote engine.
///
/// Owns the per-category name counters, the execution channel and the
/// listener registry. Every handle created through a binding is only valid
/// while the binding is active.
pub struct SessionBinding {
    id: SessionId,
    config: SessionConfig,
    engine: Arc<dyn Engine>,
    // Also serializes build + enqueue so names and submissions share one order.
    names: Mutex<NameAllocator>,
    channel: ExecutionChannel,
    listeners: Arc<ListenerRegistry>,
    stopped: AtomicBool,
}

impl SessionBinding {
    /// Start a session against `engine`. Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(engine: Arc<dyn Engine>, config: SessionConfig) -> Arc<Self> {
        let id = Uuid::new_v4();
        let listeners = Arc::new(ListenerRegistry::new(&config));
        let channel = ExecutionChannel::spawn(Arc::clone(&engine), Arc::clone(&listeners));
        tracing::info!(session = %id, "Session started");

        Arc::new(Self {
            id,
            config,
            engine,
            names: Mutex::new(NameAllocator::new()),
            channel,
            listeners,
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session still accepts calls.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Register a listener for every executed statement.
    pub fn add_execute_listener(&self, listener: impl ExecuteListener + 'static) {
        self.listeners.add(listener);
    }

    /// The session's listener registry, for history and subscriptions.
    #[must_use]
    pub const fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Number of names issued so far for `category`.
    #[must_use]
    pub fn issued(&self, category: &Category) -> u64 {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .issued(category)
    }

    /// Build the statements for `invocation` and enqueue them.
    ///
    /// Returns as soon as the batch is queued; nothing here waits on the engine.
    ///
    /// # Errors
    /// Returns error if the session is stopped or the invocation is malformed.
    pub fn submit(&self, invocation: &Invocation) -> Result<Submitted, SessionError> {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_active() {
            return Err(SessionError::Stopped(self.id));
        }

        let statements = StatementBuilder::new(self.id, &mut names).build(invocation)?;
        let completions = self.channel.submit_batch(statements.clone());
        drop(names);

        tracing::debug!(
            session = %self.id,
            method = %invocation.method,
            statements = statements.len(),
            "Submitted call"
        );
        Ok(Submitted {
            statements,
            completions,
        })
    }

    /// Submit a call whose result is retained, returning a handle to it.
    ///
    /// # Errors
    /// Returns error if the invocation retains no result, is malformed, or
    /// the session is stopped.
    pub fn derive(self: &Arc<Self>, invocation: &Invocation) -> Result<Handle, SessionError> {
        let category = invocation
            .returns
            .clone()
            .ok_or_else(|| SessionError::NoResult {
                method: invocation.method.clone(),
            })?;

        let (statement, ready) = self
            .submit(invocation)?
            .into_outer()
            .ok_or_else(|| SessionError::NoResult {
                method: invocation.method.clone(),
            })?;
        let name = statement.result_name.ok_or_else(|| SessionError::NoResult {
            method: invocation.method.clone(),
        })?;

        Ok(Handle::new(Arc::clone(self), category, name, ready))
    }

    /// Submit a terminal action; any retained result on the outer call is dropped.
    ///
    /// # Errors
    /// Returns error if the invocation is malformed or the session is stopped.
    pub fn run(&self, invocation: Invocation) -> Result<Completion, SessionError> {
        let mut invocation = invocation;
        invocation.returns = None;
        let (_, completion) = self
            .submit(&invocation)?
            .into_outer()
            .ok_or(SessionError::NoResult {
                method: invocation.method,
            })?;
        Ok(completion)
    }

    /// Call a method on an engine-side global and bind the result.
    ///
    /// # Errors
    /// Returns error if the call is malformed or the session is stopped.
    pub fn invoke_static(
        self: &Arc<Self>,
        global: &str,
        method: &str,
        args: impl IntoIterator<Item = Arg>,
        returns: Category,
    ) -> Result<Handle, SessionError> {
        let mut invocation = Invocation::new(Receiver::Static(global.to_string()), method);
        invocation.args.extend(args);
        self.derive(&invocation.returns(returns))
    }

    /// Stop the session.
    ///
    /// Everything queued or in flight resolves to `ChannelError::Stopped`,
    /// the engine is asked to interrupt, listeners are cleared and every
    /// handle of this session becomes invalid.
    pub async fn stop(&self) {
        let already = {
            let _names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
            self.stopped.swap(true, Ordering::SeqCst)
        };
        if already {
            return;
        }

        self.channel.stop();
        if let Err(e) = self.engine.interrupt().await {
            tracing::warn!(session = %self.id, "Failed to interrupt engine: {e}");
        }
        self.channel.join().await;
        self.listeners.clear();
        tracing::info!(session = %self.id, "Session stopped");
    }
}

impl std::fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinding")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;

    fn session() -> Arc<SessionBinding> {
        SessionBinding::start(Arc::new(MemoryEngine::new()), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_derive_requires_result() {
        let session = session();
        let err = session
            .derive(&Invocation::new("sqlContext", "clearCache"))
            .unwrap_err();
        assert!(matches!(err, SessionError::NoResult { .. }));
        assert_eq!(session.issued(&Category::TABLE), 0);
    }

    #[tokio::test]
    async fn test_run_drops_retained_result() {
        let session = session();
        let call = Invocation::new("sqlContext", "tables").returns(Category::TABLE);
        let record = session.run(call).unwrap().await.unwrap();
        assert_eq!(record.code, "sqlContext.tables();");
        assert_eq!(session.issued(&Category::TABLE), 0);
    }

    #[tokio::test]
    async fn test_submit_reports_batch() {
        let session = session();
        let people = session
            .invoke_static("sqlContext", "table", [Arg::from("people")], Category::TABLE)
            .unwrap();

        let call = Invocation::new(&people, "filter")
            .call_arg(Invocation::new(&people, "col").arg("age").returns(Category::COLUMN))
            .returns(Category::TABLE);
        let submitted = session.submit(&call).unwrap();

        assert_eq!(submitted.statements.len(), 2);
        assert_eq!(submitted.completions.len(), 2);
        let (outer, _) = submitted.outer().unwrap();
        assert_eq!(outer.text, "var table2 = table1.filter(column1);");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_blocks_calls() {
        let session = session();
        session.stop().await;
        session.stop().await;

        assert!(!session.is_active());
        let err = session
            .invoke_static("sqlContext", "table", [Arg::from("t")], Category::TABLE)
            .unwrap_err();
        assert_eq!(err, SessionError::Stopped(session.id()));
    }

    #[tokio::test]
    async fn test_stop_interrupts_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let session = SessionBinding::start(
            Arc::clone(&engine) as Arc<dyn Engine>,
            SessionConfig::default(),
        );
        session.stop().await;
        assert_eq!(engine.interrupts(), 1);
    }
}
