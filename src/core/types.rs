/*!
 * Core Types
 * Common types and exit-code conventions shared across the crate
 */

/// OS process ID type
pub type Pid = u32;

/// Process exit code (`128 + N` when terminated by signal `N`)
pub type ExitCode = i32;

/// Successful completion
pub const EXIT_SUCCESS: ExitCode = 0;

/// The time-limiting wrapper killed the command
pub const EXIT_TIMED_OUT: ExitCode = 124;

/// The time-limiting wrapper itself failed
pub const EXIT_TIMEOUT_FAILED: ExitCode = 125;

/// Command found but not executable
pub const EXIT_NOT_EXECUTABLE: ExitCode = 126;

/// Command not found
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Offset added to a signal number when a process dies from that signal
pub const EXIT_SIGNAL_BASE: ExitCode = 128;

/// Exit code reported for a process terminated by `signal`
#[inline]
pub fn exit_code_for_signal(signal: i32) -> ExitCode {
    EXIT_SIGNAL_BASE + signal
}

/// Signal number encoded in an exit code, if it follows the `128 + N` convention
#[inline]
pub fn signal_from_exit_code(code: ExitCode) -> Option<i32> {
    (code > EXIT_SIGNAL_BASE).then(|| code - EXIT_SIGNAL_BASE)
}
