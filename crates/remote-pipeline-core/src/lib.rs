//! Core abstractions for driving a remote execution engine through generated statements.
//!
//! This crate provides the fundamental building blocks:
//! - `NameAllocator` - Per-category remote variable names
//! - `StatementBuilder` - Renders invocations into engine source text
//! - `ExecutionRecord` - Outcome of one executed statement
//! - `SessionConfig` - Tunables shared by a session
//! - The `Engine` trait the execution channel drives

pub mod config;
pub mod literal;
pub mod name;
pub mod record;
pub mod statement;
pub mod traits;

pub use config::SessionConfig;
pub use literal::{Arg, HandleRef, Invocation, Literal, Receiver, SourceFragment};
pub use name::{Category, NameAllocator, RemoteName};
pub use record::{ExecutionRecord, ExecutionStatus};
pub use statement::{BuildError, Statement, StatementBuilder};
pub use traits::{Engine, EngineError, ExecuteReply, SessionId};
