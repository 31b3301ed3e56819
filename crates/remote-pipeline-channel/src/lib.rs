//! Ordered statement execution for remote pipelines.
//!
//! Provides:
//! - `ExecutionChannel` - Single-actor FIFO pipe to an `Engine`
//! - `Completion` - Shareable per-statement outcome
//! - `ListenerRegistry` - Execute listeners plus record history

pub mod channel;
pub mod listeners;

pub use channel::{ChannelError, Completion, ExecutionChannel};
pub use listeners::{ExecuteListener, ListenerRegistry};
