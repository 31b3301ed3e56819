//! Caller-side proxy for a remote object.

use std::sync::Arc;

use remote_pipeline_channel::Completion;
use remote_pipeline_core::{
    Arg, Category, ExecutionRecord, HandleRef, Invocation, Receiver, RemoteName, SessionId,
};
use serde_json::Value;

use crate::binding::{SessionBinding, SessionError};

/// Proxy for an object living in the remote engine.
///
/// The identity is fixed when the defining statement is built, so it can be
/// used in further calls right away. Readiness is separate: `ready()`
/// resolves once the engine has executed the defining statement. Calls made
/// before that are ordered behind it by the session's channel.
#[derive(Clone)]
pub struct Handle {
    session: Arc<SessionBinding>,
    category: Category,
    name: RemoteName,
    ready: Completion,
}

impl Handle {
    pub(crate) const fn new(
        session: Arc<SessionBinding>,
        category: Category,
        name: RemoteName,
        ready: Completion,
    ) -> Self {
        Self {
            session,
            category,
            name,
            ready,
        }
    }

    #[must_use]
    pub const fn category(&self) -> &Category {
        &self.category
    }

    /// Remote variable name, known as soon as the handle exists.
    #[must_use]
    pub const fn identity(&self) -> &RemoteName {
        &self.name
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Reference usable as an invocation receiver or argument.
    #[must_use]
    pub fn reference(&self) -> HandleRef {
        HandleRef::new(self.session.id(), self.name.clone())
    }

    /// Completion of the defining statement.
    #[must_use]
    pub fn ready(&self) -> Completion {
        self.ready.clone()
    }

    /// Whether the engine has confirmed the defining statement.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.ready.try_outcome(), Some(Ok(_)))
    }

    /// Whether the owning session is still active.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.session.is_active()
    }

    /// Wait for the defining statement and return the engine's output.
    ///
    /// # Errors
    /// Returns error if the statement failed or the session stopped first.
    pub async fn output(&self) -> Result<Option<Value>, SessionError> {
        let record = self.wait().await?;
        Ok(record.output)
    }

    /// Wait for the defining statement's record.
    ///
    /// # Errors
    /// Returns error if the statement failed or the session stopped first.
    pub async fn wait(&self) -> Result<ExecutionRecord, SessionError> {
        self.ready.clone().await.map_err(SessionError::from)
    }

    /// Start an invocation on this handle.
    #[must_use]
    pub fn call(&self, method: impl Into<String>) -> Invocation {
        Invocation::new(self.reference(), method)
    }

    /// Call `method` and bind the result as a new handle of `returns`.
    ///
    /// # Errors
    /// Returns error if an argument is malformed or the session is stopped.
    pub fn invoke(
        &self,
        method: &str,
        args: impl IntoIterator<Item = Arg>,
        returns: Category,
    ) -> Result<Self, SessionError> {
        let mut invocation = self.call(method);
        invocation.args.extend(args);
        self.derive(&invocation.returns(returns))
    }

    /// Submit an invocation whose result is retained.
    ///
    /// # Errors
    /// Returns error if the invocation retains no result, is malformed, or
    /// the session is stopped.
    pub fn derive(&self, invocation: &Invocation) -> Result<Self, SessionError> {
        self.session.derive(invocation)
    }

    /// Call a terminal action; no new handle is produced.
    ///
    /// # Errors
    /// Returns error if an argument is malformed or the session is stopped.
    pub fn action(
        &self,
        method: &str,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Completion, SessionError> {
        let mut invocation = self.call(method);
        invocation.args.extend(args);
        self.session.run(invocation)
    }
}

impl From<&Handle> for Arg {
    fn from(handle: &Handle) -> Self {
        Self::Handle(handle.reference())
    }
}

impl From<&Handle> for Receiver {
    fn from(handle: &Handle) -> Self {
        Self::Handle(handle.reference())
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("session", &self.session.id())
            .field("ready", &self.ready)
            .finish()
    }
}
