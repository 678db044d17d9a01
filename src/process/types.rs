/*!
 * Process Types
 * Command lines, timeout descriptors and immutable process metadata
 */

use crate::core::errors::{ProcessError, Result};
use crate::core::types::{ExitCode, Pid, EXIT_SUCCESS};
use crate::signals::Signal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Standard stream of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamId::Stdin => "stdin",
            StreamId::Stdout => "stdout",
            StreamId::Stderr => "stderr",
        })
    }
}

/// What to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandLine {
    /// Program and arguments, passed to exec without a shell
    Argv(Vec<String>),
    /// Shell source, run as `<shell> -c <source>`
    Shell(String),
}

impl CommandLine {
    /// Expand into an argument vector
    pub fn to_argv(&self, shell: &str) -> Vec<String> {
        match self {
            CommandLine::Argv(argv) => argv.clone(),
            CommandLine::Shell(source) => {
                vec![shell.to_string(), "-c".to_string(), source.clone()]
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Argv(argv) => argv.first().map_or(true, |p| p.trim().is_empty()),
            CommandLine::Shell(source) => source.trim().is_empty(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Argv(argv) => f.write_str(&argv.join(" ")),
            CommandLine::Shell(source) => f.write_str(source),
        }
    }
}

/// Signal the `timeout` wrapper sends when none is given
pub const WRAPPER_DEFAULT_SIGNAL: Signal = Signal::SIGTERM;

/// Time limit enforced by an external wrapper around the command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub duration: Duration,
    pub signal: Signal,
    pub kill_after: Option<Duration>,
}

impl TimeoutSpec {
    /// Both durations must be strictly positive
    pub fn new(duration: Duration, signal: Signal, kill_after: Option<Duration>) -> Result<Self> {
        if duration.is_zero() {
            return Err(ProcessError::InvalidConfig(
                "timeout duration must be > 0".into(),
            ));
        }
        if kill_after.is_some_and(|d| d.is_zero()) {
            return Err(ProcessError::InvalidConfig(
                "timeout kill-after must be > 0".into(),
            ));
        }
        Ok(Self {
            duration,
            signal,
            kill_after,
        })
    }

    /// Wrapper invocation prefix; flags equal to the wrapper's defaults are left out
    pub fn wrapper_argv(&self, program: &str) -> Vec<String> {
        let mut argv = vec![program.to_string()];
        if self.signal != WRAPPER_DEFAULT_SIGNAL {
            argv.push("--signal".to_string());
            argv.push(self.signal.number().to_string());
        }
        if let Some(kill_after) = self.kill_after {
            argv.push("--kill-after".to_string());
            argv.push(format_seconds(kill_after));
        }
        argv.push(format_seconds(self.duration));
        argv
    }
}

/// Render a duration the way `timeout(1)` accepts it: `0.01s`, `1s`, `2.5s`
pub fn format_seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}

/// Immutable description of a spawned process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessInfo {
    /// Command as the caller defined it
    pub command: CommandLine,
    /// Argument vector actually executed, wrapper included
    pub executed: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
    pub timeout: Option<TimeoutSpec>,
    pub termination_signal: Signal,
    pub expected_exit_codes: BTreeSet<ExitCode>,
    pub pid: Pid,
}

impl ProcessInfo {
    /// Whether `code` counts as success for this process
    pub fn accepts(&self, code: ExitCode) -> bool {
        code == EXIT_SUCCESS || self.expected_exit_codes.contains(&code)
    }

    /// Executed command joined for display and logging
    pub fn executed_line(&self) -> String {
        self.executed.join(" ")
    }
}
