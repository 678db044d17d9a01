/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use crate::core::types::Pid;
use crate::process::result::ProcessResult;
use crate::process::types::StreamId;
use crate::signals::SignalError;
use miette::Diagnostic;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Pipe-level I/O failure, scoped to one stream operation
#[derive(Error, Debug, Diagnostic)]
#[error("{op} on {stream} failed: {source}")]
#[diagnostic(code(process::stream_io))]
pub struct StreamError {
    pub stream: StreamId,
    pub op: &'static str,
    #[source]
    pub source: io::Error,
}

impl StreamError {
    pub fn new(stream: StreamId, op: &'static str, source: io::Error) -> Self {
        Self { stream, op, source }
    }

    /// Underlying OS error code, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Process errors
#[derive(Error, Debug, Diagnostic)]
pub enum ProcessError {
    #[error("Failed to spawn {command}: {source}")]
    #[diagnostic(
        code(process::spawn_failed),
        help("Check that the program exists, is executable and the working directory is valid.")
    )]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid process configuration: {0}")]
    #[diagnostic(code(process::invalid_config))]
    InvalidConfig(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Signal(#[from] SignalError),

    #[error("Process {} exited with unexpected code {}", .0.info().pid, .0.exit_code())]
    #[diagnostic(
        code(process::failed),
        help("Inspect the attached result for captured output, or allow the code with with_expected_exit_codes().")
    )]
    Failed(Arc<ProcessResult>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Stream(#[from] StreamError),

    #[error("Process {0} is no longer running")]
    #[diagnostic(code(process::not_running))]
    NotRunning(Pid),

    #[error("Cannot wait for process {0} on the signal pump thread")]
    #[diagnostic(
        code(process::wait_on_signal_thread),
        help("Exits are observed on that thread. Wait from another thread, or use result() to poll.")
    )]
    WaitOnSignalThread(Pid),
}

impl ProcessError {
    /// Result attached to a process failure
    pub fn result(&self) -> Option<&Arc<ProcessResult>> {
        match self {
            ProcessError::Failed(result) => Some(result),
            _ => None,
        }
    }
}
