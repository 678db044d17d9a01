/*!
 * Process Result
 * Immutable outcome of a reaped process
 */

use super::types::ProcessInfo;
use crate::core::stream::SharedStream;
use crate::core::types::{
    signal_from_exit_code, ExitCode, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, EXIT_SUCCESS,
    EXIT_TIMED_OUT, EXIT_TIMEOUT_FAILED,
};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Built exactly once, when the process is reaped
pub struct ProcessResult {
    info: Arc<ProcessInfo>,
    exit_code: ExitCode,
    stdin: SharedStream,
    stdout: SharedStream,
    stderr: SharedStream,
}

impl ProcessResult {
    pub(crate) fn new(
        info: Arc<ProcessInfo>,
        exit_code: ExitCode,
        stdin: SharedStream,
        stdout: SharedStream,
        stderr: SharedStream,
    ) -> Self {
        Self {
            info,
            exit_code,
            stdin,
            stdout,
            stderr,
        }
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    /// Exit code was zero
    pub fn succeeded(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    /// Exit code was zero or explicitly allowed
    pub fn is_expected(&self) -> bool {
        self.info.accepts(self.exit_code)
    }

    /// The time-limiting wrapper stopped the command
    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMED_OUT
    }

    /// The time-limiting wrapper itself failed
    pub fn timeout_failed(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT_FAILED
    }

    pub fn not_executable(&self) -> bool {
        self.exit_code == EXIT_NOT_EXECUTABLE
    }

    pub fn not_found(&self) -> bool {
        self.exit_code == EXIT_NOT_FOUND
    }

    /// Signal that terminated the process, if any
    pub fn terminating_signal(&self) -> Option<i32> {
        signal_from_exit_code(self.exit_code)
    }

    /// Everything written to stdin through the runner
    pub fn stdin(&self) -> Bytes {
        self.stdin.lock().peek_remaining()
    }

    /// Stdout not yet consumed through live reads
    pub fn stdout(&self) -> Bytes {
        self.stdout.lock().peek_remaining()
    }

    /// Stderr not yet consumed through live reads
    pub fn stderr(&self) -> Bytes {
        self.stderr.lock().peek_remaining()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout()).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr()).into_owned()
    }
}

impl fmt::Debug for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessResult")
            .field("pid", &self.info.pid)
            .field("command", &self.info.executed)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}
