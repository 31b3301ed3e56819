//! Kernel child process on stdio.

use std::{process::Stdio, sync::Arc};

use remote_pipeline_core::{Engine, SessionConfig};
use remote_pipeline_session::SessionBinding;
use tokio::process::{Child, Command};

use crate::peer::{KernelPeer, TransportError};

/// A kernel running as a child process, spoken to over stdin/stdout.
pub struct ProcessKernel {
    child: Child,
    peer: KernelPeer,
}

impl ProcessKernel {
    /// Launch the kernel described by a shell-style command line.
    ///
    /// The child is killed when the `ProcessKernel` is dropped.
    ///
    /// # Errors
    /// Returns error if the command line cannot be parsed or the process
    /// cannot be started.
    pub fn launch(command_line: &str) -> Result<Self, TransportError> {
        let mut parts = split_command_line(command_line)?.into_iter();
        let program = parts.next().ok_or(TransportError::EmptyCommand)?;

        let mut child = Command::new(&program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("kernel stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("kernel stdout not piped".to_string()))?;

        tracing::info!(program = %program, pid = ?child.id(), "Kernel process started");
        Ok(Self {
            child,
            peer: KernelPeer::spawn(stdout, stdin),
        })
    }

    #[must_use]
    pub const fn peer(&self) -> &KernelPeer {
        &self.peer
    }

    /// Engine view of the kernel, for binding a session.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::new(self.peer.clone())
    }

    /// OS process id, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the kernel and wait for it to exit.
    ///
    /// # Errors
    /// Returns error if the process cannot be killed.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        if self.child.id().is_some() {
            self.child.kill().await?;
        }
        tracing::info!("Kernel process stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ProcessKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessKernel")
            .field("pid", &self.child.id())
            .field("connected", &self.peer.is_connected())
            .finish()
    }
}

/// Launch the configured kernel command and bind a session to it.
///
/// # Errors
/// Returns error if no kernel command is configured or it fails to start.
pub fn start_session(
    config: SessionConfig,
) -> Result<(ProcessKernel, Arc<SessionBinding>), TransportError> {
    let command = config
        .kernel_command
        .clone()
        .ok_or(TransportError::NoKernelCommand)?;
    let kernel = ProcessKernel::launch(&command)?;
    let session = SessionBinding::start(kernel.engine(), config);
    Ok((kernel, session))
}

fn split_command_line(input: &str) -> Result<Vec<String>, TransportError> {
    let parts =
        shlex::split(input).ok_or_else(|| TransportError::InvalidCommand(input.to_string()))?;
    if parts.is_empty() {
        return Err(TransportError::EmptyCommand);
    }
    Ok(parts)
}
