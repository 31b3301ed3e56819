//! Kernel transport for remote pipelines.
//!
//! Provides:
//! - Wire protocol (JSON lines tagged by `type`)
//! - `KernelPeer` - `Engine` over any async byte stream pair
//! - `ProcessKernel` - Kernel child process on stdio (feature: process)

pub mod peer;
pub mod protocol;

#[cfg(feature = "process")]
pub mod process;

pub use peer::{KernelPeer, TransportError};
pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "process")]
pub use process::{ProcessKernel, start_session};
