//! Session binding and chainable handles for remote pipelines.
//!
//! Provides:
//! - `SessionBinding` - Naming scope, channel and listeners of one engine session
//! - `Handle` - Caller-side proxy for a remote object
//! - `MemoryEngine` - In-process engine for development and tests (feature: memory)

pub mod binding;
pub mod handle;

#[cfg(feature = "memory")]
pub mod memory;

pub use binding::{SessionBinding, SessionError, Submitted};
pub use handle::Handle;
#[cfg(feature = "memory")]
pub use memory::MemoryEngine;

pub use remote_pipeline_channel::{ChannelError, Completion, ExecuteListener, ListenerRegistry};
pub use remote_pipeline_core::{
    Arg, BuildError, Category, ExecutionRecord, ExecutionStatus, Invocation, Literal, RemoteName,
    SessionConfig, SourceFragment,
};
