/*!
 * Process Runner
 * Handle to one spawned process: waiting, signalling, stdin and output buffers
 *
 * The exit observer calls `Shared::complete` exactly once, from the signal
 * pump thread. Completion drains both pipes into the output buffers before
 * the pipes are closed, so nothing the child wrote is lost at reap time.
 * Finished hooks are handed to a `procmux-hooks` thread and never run on the
 * pump, and blocking waits refuse to run there.
 */

use super::hooks::ProcessHooks;
use super::observer::TrackingToken;
use super::output::OutputIter;
use super::result::ProcessResult;
use super::types::{ProcessInfo, StreamId};
use crate::config::RuntimeConfig;
use crate::core::errors::{ProcessError, Result, StreamError};
use crate::core::stream::{shared_stream, ByteStream, SharedStream};
use crate::core::types::{ExitCode, Pid};
use crate::monitoring::ProcessSpan;
use crate::signals::{on_signal_thread, Signal, SignalError};
use bytes::Bytes;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

enum Phase {
    Running,
    Done(Arc<ProcessResult>),
}

struct RunnerState {
    phase: Phase,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

/// What one non-blocking drain of a pipe produced
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Drained {
    pub bytes: usize,
    pub eof: bool,
}

pub(crate) struct Shared {
    info: Arc<ProcessInfo>,
    state: Mutex<RunnerState>,
    done: Condvar,
    stdin_buf: SharedStream,
    stdout_buf: SharedStream,
    stderr_buf: SharedStream,
    hooks: ProcessHooks,
    config: RuntimeConfig,
    span: ProcessSpan,
}

impl Shared {
    /// Exit callback. Runs once per process, on the signal pump thread.
    fn complete(&self, exit_code: ExitCode) {
        let result = {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Done(_)) {
                warn!(pid = self.info.pid, "Duplicate completion ignored");
                return;
            }

            if let Some(pipe) = state.stdout.as_mut() {
                if let Err(e) = drain_pipe(pipe, &self.stdout_buf, self.config.read_chunk_size) {
                    warn!(pid = self.info.pid, error = %e, "Failed to drain stdout at exit");
                }
            }
            if let Some(pipe) = state.stderr.as_mut() {
                if let Err(e) = drain_pipe(pipe, &self.stderr_buf, self.config.read_chunk_size) {
                    warn!(pid = self.info.pid, error = %e, "Failed to drain stderr at exit");
                }
            }
            state.stdin = None;
            state.stdout = None;
            state.stderr = None;

            let result = Arc::new(ProcessResult::new(
                Arc::clone(&self.info),
                exit_code,
                Arc::clone(&self.stdin_buf),
                Arc::clone(&self.stdout_buf),
                Arc::clone(&self.stderr_buf),
            ));
            state.phase = Phase::Done(Arc::clone(&result));
            result
        };
        self.done.notify_all();

        self.span.finish(exit_code, result.is_expected());
        self.notify_finished(exit_code);
    }

    /// Run the finished hooks on their own thread
    fn notify_finished(&self, exit_code: ExitCode) {
        if !self.hooks.has_finished() {
            return;
        }
        let hooks = self.hooks.clone();
        let info = Arc::clone(&self.info);
        let spawned = thread::Builder::new()
            .name("procmux-hooks".into())
            .spawn(move || hooks.emit_finished(&info, exit_code));
        if let Err(e) = spawned {
            warn!(pid = self.info.pid, error = %e, "Failed to start hook thread, running hooks inline");
            self.hooks.emit_finished(&self.info, exit_code);
        }
    }

    pub(crate) fn pid(&self) -> Pid {
        self.info.pid
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Running)
    }

    fn result(&self) -> Option<Arc<ProcessResult>> {
        match &self.state.lock().phase {
            Phase::Done(result) => Some(Arc::clone(result)),
            Phase::Running => None,
        }
    }

    /// Block until completion or until `timeout` passes
    pub(crate) fn wait_done(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if matches!(state.phase, Phase::Running) {
            self.done.wait_for(&mut state, timeout);
        }
    }

    /// Move whatever both pipes hold into the buffers without consuming it
    fn pump_output(&self) {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Running) {
            return;
        }
        let chunk = self.config.read_chunk_size;
        if let Some(pipe) = state.stdout.as_mut() {
            if let Err(e) = drain_pipe(pipe, &self.stdout_buf, chunk) {
                debug!(pid = self.info.pid, error = %e, "stdout drain failed");
            }
        }
        if let Some(pipe) = state.stderr.as_mut() {
            if let Err(e) = drain_pipe(pipe, &self.stderr_buf, chunk) {
                debug!(pid = self.info.pid, error = %e, "stderr drain failed");
            }
        }
    }

    /// Drain one pipe, then consume the unread part of its buffer
    pub(crate) fn read_stream(&self, stream: StreamId) -> Result<(Bytes, Drained)> {
        let mut state = self.state.lock();
        if !matches!(state.phase, Phase::Running) {
            return Ok((Bytes::new(), Drained { bytes: 0, eof: true }));
        }

        let chunk = self.config.read_chunk_size;
        let (drained, buffer) = match stream {
            StreamId::Stdout => (
                drain_optional(state.stdout.as_mut(), &self.stdout_buf, chunk),
                &self.stdout_buf,
            ),
            StreamId::Stderr => (
                drain_optional(state.stderr.as_mut(), &self.stderr_buf, chunk),
                &self.stderr_buf,
            ),
            StreamId::Stdin => {
                return Err(StreamError::new(
                    stream,
                    "read",
                    io::Error::from(io::ErrorKind::Unsupported),
                )
                .into())
            }
        };
        let drained = drained.map_err(|e| StreamError::new(stream, "read", e))?;
        drop(state);

        let bytes = buffer
            .lock()
            .read_to_end()
            .map_err(|e| StreamError::new(stream, "read", e))?;
        Ok((bytes, drained))
    }

    /// Duplicate the live output descriptors for readiness polling
    pub(crate) fn output_fds(&self) -> io::Result<(Option<OwnedFd>, Option<OwnedFd>)> {
        let state = self.state.lock();
        if !matches!(state.phase, Phase::Running) {
            return Ok((None, None));
        }
        let stdout = state
            .stdout
            .as_ref()
            .map(|p| p.as_fd().try_clone_to_owned())
            .transpose()?;
        let stderr = state
            .stderr
            .as_ref()
            .map(|p| p.as_fd().try_clone_to_owned())
            .transpose()?;
        Ok((stdout, stderr))
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn send(&self, signal: Signal) -> Result<bool> {
        let state = self.state.lock();
        if !matches!(state.phase, Phase::Running) {
            return Ok(false);
        }
        let target = nix::unistd::Pid::from_raw(self.info.pid as i32);
        match nix::sys::signal::kill(target, signal.to_nix()?) {
            Ok(()) => {
                debug!(pid = self.info.pid, signal = %signal, "Signal sent");
                Ok(true)
            }
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(SignalError::os("kill", e).into()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock()
    }
}

/// A spawned process.
///
/// Dropping a `Process` that is still running kills it.
pub struct Process {
    shared: Arc<Shared>,
}

impl Process {
    /// Wire a freshly spawned child to its exit callback
    pub(crate) fn attach(
        mut child: Child,
        info: ProcessInfo,
        token: TrackingToken,
        hooks: ProcessHooks,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let pid = info.pid;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let fds = [
            stdout.as_ref().map(AsRawFd::as_raw_fd),
            stderr.as_ref().map(AsRawFd::as_raw_fd),
        ];
        for fd in fds.into_iter().flatten() {
            if let Err(e) = set_nonblocking(fd) {
                if let Err(kill_err) = child.kill() {
                    warn!(pid, error = %kill_err, "Failed to kill child after setup error");
                }
                return Err(SignalError::os("fcntl", e).into());
            }
        }
        // Pipes are owned by the runner from here; the OS handle needs nothing else
        drop(child);

        let info = Arc::new(info);
        let span = ProcessSpan::new(pid, &info.executed_line());
        let shared = Arc::new(Shared {
            info: Arc::clone(&info),
            state: Mutex::new(RunnerState {
                phase: Phase::Running,
                stdin,
                stdout,
                stderr,
            }),
            done: Condvar::new(),
            stdin_buf: shared_stream(),
            stdout_buf: shared_stream(),
            stderr_buf: shared_stream(),
            hooks,
            config,
            span,
        });

        shared.hooks.emit_started(&info);

        let completion = Arc::clone(&shared);
        if let Err(e) = token.on_exit(pid, move |code| completion.complete(code)) {
            if let Err(kill_err) = shared.send(Signal::SIGKILL) {
                warn!(pid, error = %kill_err, "Failed to kill orphaned child");
            }
            return Err(e.into());
        }

        Ok(Self { shared })
    }

    pub fn pid(&self) -> Pid {
        self.shared.info.pid
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.shared.info
    }

    /// Correlation id shared by every log line of this process
    pub fn trace_id(&self) -> &str {
        self.shared.span.trace_id()
    }

    /// True until the exit has been observed
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_done(&self) -> bool {
        !self.is_running()
    }

    /// The result, if the process has finished; never blocks
    pub fn result(&self) -> Option<Arc<ProcessResult>> {
        self.shared.result()
    }

    /// Block until the process exits, polling at the configured interval
    pub fn wait(&self) -> Result<Arc<ProcessResult>> {
        self.wait_with_interval(self.shared.config.wait_poll_interval())
    }

    /// Block until the process exits.
    ///
    /// Fails with `ProcessError::Failed` when the exit code is neither 0 nor
    /// an expected code; the error carries the same result on every call.
    /// Fails with `WaitOnSignalThread` when called from a signal listener
    /// while the process is still running.
    pub fn wait_with_interval(&self, interval: Duration) -> Result<Arc<ProcessResult>> {
        loop {
            if let Some(result) = self.shared.result() {
                return outcome(result);
            }
            self.ensure_blocking_allowed()?;
            self.shared.pump_output();
            self.shared.wait_done(interval);
        }
    }

    /// Like `wait`, giving up after `timeout` with `Ok(None)`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<Arc<ProcessResult>>> {
        let deadline = Instant::now() + timeout;
        let interval = self.shared.config.wait_poll_interval();
        loop {
            if let Some(result) = self.shared.result() {
                return outcome(result).map(Some);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.ensure_blocking_allowed()?;
            self.shared.pump_output();
            self.shared.wait_done(interval.min(deadline - now));
        }
    }

    /// Async variant of `wait` for callers inside a tokio runtime
    pub async fn wait_async(&self) -> Result<Arc<ProcessResult>> {
        let interval = self.shared.config.wait_poll_interval();
        loop {
            if let Some(result) = self.shared.result() {
                return outcome(result);
            }
            self.ensure_blocking_allowed()?;
            self.shared.pump_output();
            tokio::time::sleep(interval).await;
        }
    }

    /// The pump thread observes every exit, so it can never wait for one
    fn ensure_blocking_allowed(&self) -> Result<()> {
        if on_signal_thread() {
            return Err(ProcessError::WaitOnSignalThread(self.pid()));
        }
        Ok(())
    }

    /// Send `signal` if the process is still running; returns whether it was delivered
    pub fn signal(&self, signal: Signal) -> Result<bool> {
        self.shared.send(signal)
    }

    /// Send the termination signal, escalating to SIGKILL once `timeout` passes
    pub fn terminate(&self, timeout: Option<Duration>) -> Result<bool> {
        let sent = self.signal(self.shared.info.termination_signal)?;
        let Some(timeout) = timeout else {
            return Ok(sent);
        };

        let deadline = Instant::now() + timeout;
        let interval = self.shared.config.wait_poll_interval();
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                warn!(pid = self.pid(), "Process ignored termination request, killing");
                self.signal(Signal::SIGKILL)?;
                break;
            }
            self.ensure_blocking_allowed()?;
            self.shared.pump_output();
            self.shared.wait_done(interval.min(deadline - now));
        }
        Ok(sent)
    }

    /// Write `data` to the child and record it in the stdin buffer.
    ///
    /// Only data fully written to the pipe is recorded. Fails with
    /// `NotRunning` once the process is done, and with a stdin stream error
    /// after `close_stdin` or when the child closed its end.
    pub fn write_to_stdin(&self, data: impl AsRef<[u8]>, append_newline: bool) -> Result<usize> {
        let mut payload = data.as_ref().to_vec();
        if append_newline {
            payload.push(b'\n');
        }

        let mut pipe = {
            let state = self.shared.lock();
            if !matches!(state.phase, Phase::Running) {
                return Err(ProcessError::NotRunning(self.pid()));
            }
            let Some(pipe) = state.stdin.as_ref() else {
                let closed = io::Error::from(io::ErrorKind::BrokenPipe);
                return Err(StreamError::new(StreamId::Stdin, "write", closed).into());
            };
            pipe.as_fd()
                .try_clone_to_owned()
                .map(File::from)
                .map_err(|e| StreamError::new(StreamId::Stdin, "dup", e))?
        };

        pipe.write_all(&payload)
            .and_then(|()| pipe.flush())
            .map_err(|e| StreamError::new(StreamId::Stdin, "write", e))?;
        self.shared
            .stdin_buf
            .lock()
            .write(&payload)
            .map_err(|e| StreamError::new(StreamId::Stdin, "record", e))?;
        Ok(payload.len())
    }

    /// Close the child's stdin so it sees end of input
    pub fn close_stdin(&self) {
        self.shared.lock().stdin = None;
    }

    /// Everything written to stdin so far
    pub fn stdin_buffer(&self) -> Bytes {
        self.shared.stdin_buf.lock().contents()
    }

    /// Stdout produced since the last read; empty once the process is done
    pub fn read_stdout_buffer(&self) -> Result<Bytes> {
        self.shared.read_stream(StreamId::Stdout).map(|(bytes, _)| bytes)
    }

    /// Stderr produced since the last read; empty once the process is done
    pub fn read_stderr_buffer(&self) -> Result<Bytes> {
        self.shared.read_stream(StreamId::Stderr).map(|(bytes, _)| bytes)
    }

    /// Live `(stream, bytes)` chunks until the process finishes
    pub fn iter(&self) -> OutputIter {
        OutputIter::new(Arc::clone(&self.shared))
    }
}

impl<'a> IntoIterator for &'a Process {
    type Item = Result<(StreamId, Bytes)>;
    type IntoIter = OutputIter;

    fn into_iter(self) -> OutputIter {
        self.iter()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if !self.shared.is_running() {
            return;
        }
        match self.shared.send(Signal::SIGKILL) {
            Ok(true) => debug!(pid = self.pid(), "Killed process on drop"),
            Ok(false) => {}
            Err(e) => warn!(pid = self.pid(), error = %e, "Failed to kill process on drop"),
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid())
            .field("command", &self.shared.info.executed)
            .field("running", &self.is_running())
            .finish()
    }
}

fn outcome(result: Arc<ProcessResult>) -> Result<Arc<ProcessResult>> {
    if result.is_expected() {
        Ok(result)
    } else {
        Err(ProcessError::Failed(result))
    }
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn drain_optional<R: Read>(
    pipe: Option<&mut R>,
    sink: &SharedStream,
    chunk: usize,
) -> io::Result<Drained> {
    match pipe {
        Some(pipe) => drain_pipe(pipe, sink, chunk),
        None => Ok(Drained { bytes: 0, eof: true }),
    }
}

/// Read a non-blocking pipe until it would block, appending to `sink`.
///
/// Appending leaves the sink's read cursor where it was, so bytes the
/// caller has not consumed stay readable.
pub(crate) fn drain_pipe<R: Read>(
    pipe: &mut R,
    sink: &SharedStream,
    chunk: usize,
) -> io::Result<Drained> {
    let mut buf = vec![0u8; chunk.max(1)];
    let mut drained = Drained::default();
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => {
                drained.eof = true;
                return Ok(drained);
            }
            Ok(n) => {
                sink.lock().write(&buf[..n])?;
                drained.bytes += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(drained),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
