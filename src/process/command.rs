/*!
 * Command Builder
 * Assembles what to run and how, then spawns it under exit tracking
 */

use super::hooks::ProcessHooks;
use super::observer::ExitObserver;
use super::result::ProcessResult;
use super::runner::Process;
use super::types::{CommandLine, ProcessInfo, TimeoutSpec};
use crate::config::RuntimeConfig;
use crate::core::errors::{ProcessError, Result};
use crate::core::types::ExitCode;
use crate::signals::Signal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Description of a process to spawn
#[derive(Debug, Clone)]
pub struct Command {
    line: CommandLine,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    env_clear: bool,
    timeout: Option<TimeoutSpec>,
    termination_signal: Signal,
    expected_exit_codes: BTreeSet<ExitCode>,
    hooks: ProcessHooks,
    config: RuntimeConfig,
}

impl Command {
    /// Program followed by its arguments, executed without a shell
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_line(CommandLine::Argv(argv.into_iter().map(Into::into).collect()))
    }

    /// Shell source, executed as `<shell> -c <source>`
    pub fn shell(source: impl Into<String>) -> Self {
        Self::from_line(CommandLine::Shell(source.into()))
    }

    fn from_line(line: CommandLine) -> Self {
        Self {
            line,
            cwd: None,
            env: BTreeMap::new(),
            env_clear: false,
            timeout: None,
            termination_signal: Signal::SIGTERM,
            expected_exit_codes: BTreeSet::new(),
            hooks: ProcessHooks::default(),
            config: RuntimeConfig::default(),
        }
    }

    /// Append arguments; ignored for shell commands
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &mut self.line {
            CommandLine::Argv(argv) => argv.extend(args.into_iter().map(Into::into)),
            CommandLine::Shell(_) => debug!("Arguments ignored for shell command"),
        }
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Start from an empty environment instead of inheriting this process's
    pub fn with_env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Run under the external time-limiting wrapper.
    ///
    /// `duration` and `kill_after` must be strictly positive.
    pub fn with_timeout(
        mut self,
        duration: Duration,
        signal: Signal,
        kill_after: Option<Duration>,
    ) -> Result<Self> {
        self.timeout = Some(TimeoutSpec::new(duration, signal, kill_after)?);
        Ok(self)
    }

    /// Signal `Process::terminate` sends first
    pub fn with_termination_signal(mut self, signal: Signal) -> Self {
        self.termination_signal = signal;
        self
    }

    /// Exit codes besides 0 that count as success
    pub fn with_expected_exit_codes(mut self, codes: impl IntoIterator<Item = ExitCode>) -> Self {
        self.expected_exit_codes.extend(codes);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_started<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProcessInfo) + Send + Sync + 'static,
    {
        self.hooks.on_started(hook);
        self
    }

    pub fn on_finished<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProcessInfo, ExitCode) + Send + Sync + 'static,
    {
        self.hooks.on_finished(hook);
        self
    }

    pub fn line(&self) -> &CommandLine {
        &self.line
    }

    /// Argument vector that will be executed, wrapper included
    pub fn build_command(&self) -> Vec<String> {
        let inner = self.line.to_argv(&self.config.shell);
        match &self.timeout {
            Some(timeout) => {
                let mut argv = timeout.wrapper_argv(&self.config.timeout_program);
                argv.extend(inner);
                argv
            }
            None => inner,
        }
    }

    /// Spawn under the process-wide exit observer
    pub fn start(&self) -> Result<Process> {
        let observer = ExitObserver::global()?;
        self.start_with(&observer)
    }

    /// Spawn under `observer`.
    ///
    /// Tracking begins before the spawn, so an immediate exit is never missed.
    pub fn start_with(&self, observer: &Arc<ExitObserver>) -> Result<Process> {
        if self.line.is_empty() {
            return Err(ProcessError::InvalidConfig("command is empty".into()));
        }
        self.config.validate()?;

        let executed = self.build_command();
        let (program, args) = executed
            .split_first()
            .ok_or_else(|| ProcessError::InvalidConfig("command is empty".into()))?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args);
        if self.env_clear {
            cmd.env_clear();
        }
        cmd.envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let token = observer.start_tracking()?;
        let spawned = {
            let _reaping = observer.dispatcher().hold_reaping();
            cmd.spawn()
        };
        let child = spawned.map_err(|source| {
            error!(command = %executed.join(" "), error = %source, "Spawn failed");
            ProcessError::SpawnFailed {
                command: executed.join(" "),
                source,
            }
        })?;

        let info = ProcessInfo {
            command: self.line.clone(),
            pid: child.id(),
            executed,
            cwd: self.cwd.clone(),
            env: (self.env_clear || !self.env.is_empty()).then(|| self.env.clone()),
            timeout: self.timeout,
            termination_signal: self.termination_signal,
            expected_exit_codes: self.expected_exit_codes.clone(),
        };

        Process::attach(child, info, token, self.hooks.clone(), self.config.clone())
    }

    /// Spawn and wait for the result
    pub fn run(&self) -> Result<Arc<ProcessResult>> {
        self.start()?.wait()
    }
}
