/*!
 * Live Output
 * Iterates stdout/stderr chunks as the child produces them
 *
 * The iterator blocks in poll(2) on duplicates of the output pipes, bounded
 * by the configured readiness timeout so it notices completion promptly.
 * Bytes are read through the runner, so they land in the same buffers the
 * result exposes and nothing is yielded twice.
 */

use super::runner::Shared;
use super::types::StreamId;
use crate::core::errors::{ProcessError, Result, StreamError};
use crate::signals::on_signal_thread;
use bytes::Bytes;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

/// Yields `(stream, bytes)` until the process is done
pub struct OutputIter {
    shared: Arc<Shared>,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
    queue: VecDeque<(StreamId, Bytes)>,
    error: Option<ProcessError>,
    finished: bool,
}

impl OutputIter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let (stdout, stderr, error) = match shared.output_fds() {
            Ok((stdout, stderr)) => (stdout, stderr, None),
            Err(e) => (None, None, Some(StreamError::new(StreamId::Stdout, "dup", e).into())),
        };
        Self {
            shared,
            stdout,
            stderr,
            queue: VecDeque::new(),
            error,
            finished: false,
        }
    }

    fn poll_timeout(&self) -> PollTimeout {
        let ms = self.shared.config().output_poll_timeout_ms;
        PollTimeout::from(u16::try_from(ms).unwrap_or(u16::MAX))
    }

    /// Wait for readiness and queue whatever became readable
    fn fill(&mut self) -> Result<()> {
        if self.stdout.is_none() && self.stderr.is_none() {
            // Both pipes hit EOF; only the exit is left to wait for
            self.shared
                .wait_done(self.shared.config().output_poll_timeout());
            return Ok(());
        }

        let timeout = self.poll_timeout();
        let mut watched = Vec::with_capacity(2);
        let mut fds = Vec::with_capacity(2);
        if let Some(fd) = self.stdout.as_ref() {
            watched.push(StreamId::Stdout);
            fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLIN));
        }
        if let Some(fd) = self.stderr.as_ref() {
            watched.push(StreamId::Stderr);
            fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                let source = io::Error::from_raw_os_error(e as i32);
                return Err(StreamError::new(watched[0], "poll", source).into());
            }
        }

        let ready: Vec<(StreamId, PollFlags)> = watched
            .into_iter()
            .zip(fds.iter())
            .filter_map(|(stream, fd)| fd.revents().map(|flags| (stream, flags)))
            .filter(|(_, flags)| !flags.is_empty())
            .collect();
        drop(fds);

        for (stream, flags) in ready {
            let (bytes, drained) = self.shared.read_stream(stream)?;
            if !bytes.is_empty() {
                self.queue.push_back((stream, bytes));
            }
            let hung_up =
                flags.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL);
            if drained.eof || (hung_up && drained.bytes == 0) {
                match stream {
                    StreamId::Stdout => self.stdout = None,
                    StreamId::Stderr => self.stderr = None,
                    StreamId::Stdin => {}
                }
            }
        }
        Ok(())
    }
}

impl Iterator for OutputIter {
    type Item = Result<(StreamId, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.queue.pop_front() {
                return Some(Ok(chunk));
            }
            if let Some(error) = self.error.take() {
                self.finished = true;
                return Some(Err(error));
            }
            if self.finished || !self.shared.is_running() {
                self.finished = true;
                return None;
            }
            if on_signal_thread() {
                self.finished = true;
                return Some(Err(ProcessError::WaitOnSignalThread(self.shared.pid())));
            }
            if let Err(e) = self.fill() {
                self.error = Some(e);
            }
        }
    }
}
