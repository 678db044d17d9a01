/*!
 * Signal Types
 * UNIX-style signal definitions, dispatch events and result types
 */

use crate::core::types::{exit_code_for_signal, ExitCode, Pid};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Signal operation result
pub type SignalResult<T> = Result<T, SignalError>;

/// Signal errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SignalError {
    #[error("Signal {0} cannot be intercepted")]
    #[diagnostic(
        code(signals::uninterceptable),
        help("SIGKILL, SIGSTOP and SIGSEGV keep their default disposition.")
    )]
    Uninterceptable(Signal),

    #[error("Invalid signal: {0}")]
    #[diagnostic(code(signals::invalid))]
    InvalidSignal(i32),

    #[error("Exit callback already registered for PID {0}")]
    #[diagnostic(
        code(signals::duplicate_exit_callback),
        help("Each spawned process gets exactly one exit callback.")
    )]
    DuplicateExitCallback(Pid),

    #[error("{op} failed: {message}")]
    #[diagnostic(code(signals::os))]
    Os { op: &'static str, message: String },

    #[error("OS signal source already claimed by another dispatcher")]
    #[diagnostic(
        code(signals::source_unavailable),
        help("Use SignalDispatcher::global() to share the process-wide dispatcher.")
    )]
    SourceUnavailable,
}

impl SignalError {
    pub(crate) fn os(op: &'static str, err: impl fmt::Display) -> Self {
        SignalError::Os {
            op,
            message: err.to_string(),
        }
    }
}

/// UNIX-style signal numbers (Linux numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Signal {
    /// Hangup detected on controlling terminal or death of controlling process
    SIGHUP = 1,
    /// Interrupt from keyboard (Ctrl+C)
    SIGINT = 2,
    /// Quit from keyboard (Ctrl+\)
    SIGQUIT = 3,
    /// Illegal instruction
    SIGILL = 4,
    /// Trace/breakpoint trap
    SIGTRAP = 5,
    /// Abort signal
    SIGABRT = 6,
    /// Bus error (bad memory access)
    SIGBUS = 7,
    /// Floating-point exception
    SIGFPE = 8,
    /// Kill signal (cannot be caught or ignored)
    SIGKILL = 9,
    /// User-defined signal 1
    SIGUSR1 = 10,
    /// Invalid memory reference
    SIGSEGV = 11,
    /// User-defined signal 2
    SIGUSR2 = 12,
    /// Broken pipe
    SIGPIPE = 13,
    /// Timer signal
    SIGALRM = 14,
    /// Termination signal
    SIGTERM = 15,
    /// Child process stopped or terminated
    SIGCHLD = 17,
    /// Continue if stopped
    SIGCONT = 18,
    /// Stop process (cannot be caught or ignored)
    SIGSTOP = 19,
    /// Stop typed at terminal (Ctrl+Z)
    SIGTSTP = 20,
    /// Terminal input for background process
    SIGTTIN = 21,
    /// Terminal output for background process
    SIGTTOU = 22,
    /// Urgent condition on socket
    SIGURG = 23,
    /// CPU time limit exceeded
    SIGXCPU = 24,
    /// File size limit exceeded
    SIGXFSZ = 25,
    /// Virtual alarm clock
    SIGVTALRM = 26,
    /// Profiling timer expired
    SIGPROF = 27,
    /// Window resize signal
    SIGWINCH = 28,
    /// I/O now possible
    SIGIO = 29,
    /// Power failure
    SIGPWR = 30,
    /// Bad system call
    SIGSYS = 31,
}

impl Signal {
    /// Convert from signal number
    pub fn from_number(n: i32) -> SignalResult<Self> {
        match n {
            1 => Ok(Signal::SIGHUP),
            2 => Ok(Signal::SIGINT),
            3 => Ok(Signal::SIGQUIT),
            4 => Ok(Signal::SIGILL),
            5 => Ok(Signal::SIGTRAP),
            6 => Ok(Signal::SIGABRT),
            7 => Ok(Signal::SIGBUS),
            8 => Ok(Signal::SIGFPE),
            9 => Ok(Signal::SIGKILL),
            10 => Ok(Signal::SIGUSR1),
            11 => Ok(Signal::SIGSEGV),
            12 => Ok(Signal::SIGUSR2),
            13 => Ok(Signal::SIGPIPE),
            14 => Ok(Signal::SIGALRM),
            15 => Ok(Signal::SIGTERM),
            17 => Ok(Signal::SIGCHLD),
            18 => Ok(Signal::SIGCONT),
            19 => Ok(Signal::SIGSTOP),
            20 => Ok(Signal::SIGTSTP),
            21 => Ok(Signal::SIGTTIN),
            22 => Ok(Signal::SIGTTOU),
            23 => Ok(Signal::SIGURG),
            24 => Ok(Signal::SIGXCPU),
            25 => Ok(Signal::SIGXFSZ),
            26 => Ok(Signal::SIGVTALRM),
            27 => Ok(Signal::SIGPROF),
            28 => Ok(Signal::SIGWINCH),
            29 => Ok(Signal::SIGIO),
            30 => Ok(Signal::SIGPWR),
            31 => Ok(Signal::SIGSYS),
            _ => Err(SignalError::InvalidSignal(n)),
        }
    }

    /// Get signal number
    #[inline]
    pub fn number(&self) -> i32 {
        *self as i32
    }

    /// Check if a handler may be installed for this signal
    pub fn is_interceptable(&self) -> bool {
        !matches!(self, Signal::SIGKILL | Signal::SIGSTOP | Signal::SIGSEGV)
    }

    /// Exit code of a process terminated by this signal
    #[inline]
    pub fn exit_code(&self) -> ExitCode {
        exit_code_for_signal(self.number())
    }

    /// Matching `nix` signal for OS calls
    pub fn to_nix(self) -> SignalResult<nix::sys::signal::Signal> {
        nix::sys::signal::Signal::try_from(self.number())
            .map_err(|_| SignalError::InvalidSignal(self.number()))
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Signal::SIGHUP => "Hangup",
            Signal::SIGINT => "Interrupt",
            Signal::SIGQUIT => "Quit",
            Signal::SIGILL => "Illegal instruction",
            Signal::SIGTRAP => "Trace/breakpoint trap",
            Signal::SIGABRT => "Aborted",
            Signal::SIGBUS => "Bus error",
            Signal::SIGFPE => "Floating point exception",
            Signal::SIGKILL => "Killed",
            Signal::SIGUSR1 => "User defined signal 1",
            Signal::SIGSEGV => "Segmentation fault",
            Signal::SIGUSR2 => "User defined signal 2",
            Signal::SIGPIPE => "Broken pipe",
            Signal::SIGALRM => "Alarm clock",
            Signal::SIGTERM => "Terminated",
            Signal::SIGCHLD => "Child status changed",
            Signal::SIGCONT => "Continued",
            Signal::SIGSTOP => "Stopped (signal)",
            Signal::SIGTSTP => "Stopped",
            Signal::SIGTTIN => "Stopped (tty input)",
            Signal::SIGTTOU => "Stopped (tty output)",
            Signal::SIGURG => "Urgent I/O condition",
            Signal::SIGXCPU => "CPU time limit exceeded",
            Signal::SIGXFSZ => "File size limit exceeded",
            Signal::SIGVTALRM => "Virtual timer expired",
            Signal::SIGPROF => "Profiling timer expired",
            Signal::SIGWINCH => "Window size changed",
            Signal::SIGIO => "I/O possible",
            Signal::SIGPWR => "Power failure",
            Signal::SIGSYS => "Bad system call",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

impl TryFrom<i32> for Signal {
    type Error = SignalError;

    fn try_from(n: i32) -> SignalResult<Self> {
        Signal::from_number(n)
    }
}

/// Origin of a signal, mirroring the `si_code` classes we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCode {
    /// Sent by a process (kill, raise) or the kernel for a non-child reason
    User,
    /// Child exited normally
    Exited,
    /// Child was killed by a signal
    Killed,
    /// Child was killed by a signal and dumped core
    Dumped,
    /// Child was stopped (job control)
    Stopped,
    /// Stopped child was continued
    Continued,
}

impl SignalCode {
    /// Whether the code describes a child that is gone for good
    #[inline]
    pub fn is_termination(&self) -> bool {
        matches!(
            self,
            SignalCode::Exited | SignalCode::Killed | SignalCode::Dumped
        )
    }
}

/// Raw signal information attached to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub pid: Option<Pid>,
    /// Exit status; `128 + N` when the child died from signal `N`
    pub status: i32,
    pub code: SignalCode,
}

impl SignalInfo {
    /// Info for a signal that did not originate from a child state change
    pub fn user() -> Self {
        Self {
            pid: None,
            status: 0,
            code: SignalCode::User,
        }
    }
}

impl From<ChildTransition> for SignalInfo {
    fn from(transition: ChildTransition) -> Self {
        let (status, code) = match transition.state {
            ChildState::Exited(code) => (code, SignalCode::Exited),
            ChildState::Killed {
                signal,
                core_dumped,
            } => (
                exit_code_for_signal(signal),
                if core_dumped {
                    SignalCode::Dumped
                } else {
                    SignalCode::Killed
                },
            ),
            ChildState::Stopped(signal) => (signal, SignalCode::Stopped),
            ChildState::Continued => (0, SignalCode::Continued),
        };
        Self {
            pid: Some(transition.pid),
            status,
            code,
        }
    }
}

/// One child state change reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildTransition {
    pub pid: Pid,
    pub state: ChildState,
}

/// Child state as classified by `waitpid`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Exited(i32),
    Killed { signal: i32, core_dumped: bool },
    Stopped(i32),
    Continued,
}

/// Event handed to listeners for one dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    pub signal: Signal,
    pub info: SignalInfo,
    /// Set by a listener to exit this process with `128 + signal` after dispatch
    pub terminate: bool,
}

impl SignalEvent {
    pub fn new(signal: Signal, info: SignalInfo) -> Self {
        Self {
            signal,
            info,
            terminate: false,
        }
    }

    /// Exit code of the child this event reports, if it terminated
    pub fn child_exit_code(&self) -> Option<(Pid, ExitCode)> {
        match self.info.pid {
            Some(pid) if self.info.code.is_termination() => Some((pid, self.info.status)),
            _ => None,
        }
    }
}

/// Handle returned by registration, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub signal: Signal,
    pub id: u64,
}
