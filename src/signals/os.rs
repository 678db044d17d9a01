/*!
 * OS Signal Source
 * sigaction-backed handlers forwarding deliveries through a self-pipe
 *
 * The installed handler does nothing but write the signal number into a
 * non-blocking socket. A dedicated pump thread reads it back and runs the
 * dispatcher, so listeners never execute in interrupt context.
 */

use super::dispatcher::SignalDispatcher;
use super::traits::SignalSource;
use super::types::{ChildState, ChildTransition, Signal, SignalError, SignalResult};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use std::cell::Cell;
use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, warn};

/// Write end of the self-pipe, read by the signal handler
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

thread_local! {
    static ON_SIGNAL_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Dispatcher bound to the OS signal source, created on first use
static GLOBAL: Mutex<Option<Arc<SignalDispatcher>>> = parking_lot::const_mutex(None);

extern "C" fn forward_signal(signo: nix::libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let saved = Errno::last_raw();
    let byte = signo as u8;
    // SAFETY: write(2) is async-signal-safe and `fd` stays open while claimed.
    unsafe {
        nix::libc::write(fd, (&byte as *const u8).cast(), 1);
    }
    Errno::set_raw(saved);
}

/// `SignalSource` talking to the real process signal table
pub struct OsSignalSource {
    wake: UnixStream,
}

impl OsSignalSource {
    /// Claim the process-wide self-pipe; only one source may exist at a time
    fn claim() -> SignalResult<(Self, UnixStream)> {
        let (reader, wake) =
            UnixStream::pair().map_err(|e| SignalError::os("socketpair", e))?;
        wake.set_nonblocking(true)
            .map_err(|e| SignalError::os("set_nonblocking", e))?;

        WAKE_FD
            .compare_exchange(-1, wake.as_raw_fd(), Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SignalError::SourceUnavailable)?;

        Ok((Self { wake }, reader))
    }

    fn set_handler(signal: Signal, handler: SigHandler) -> SignalResult<()> {
        let flags = match handler {
            SigHandler::Handler(_) => SaFlags::SA_RESTART,
            _ => SaFlags::empty(),
        };
        let action = SigAction::new(handler, flags, SigSet::empty());
        // SAFETY: the handler only touches an atomic and calls write(2).
        unsafe { sigaction(signal.to_nix()?, &action) }
            .map(|_| ())
            .map_err(|e| SignalError::os("sigaction", e))
    }
}

impl SignalSource for OsSignalSource {
    fn install(&self, signal: Signal) -> SignalResult<()> {
        Self::set_handler(signal, SigHandler::Handler(forward_signal))
    }

    fn uninstall(&self, signal: Signal) -> SignalResult<()> {
        Self::set_handler(signal, SigHandler::SigDfl)
    }

    fn next_child_transition(&self) -> SignalResult<Option<ChildTransition>> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
        loop {
            let (pid, state) = match waitpid(None::<NixPid>, Some(flags)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Ok(WaitStatus::Exited(pid, code)) => (pid, ChildState::Exited(code)),
                Ok(WaitStatus::Signaled(pid, signal, core_dumped)) => (
                    pid,
                    ChildState::Killed {
                        signal: signal as i32,
                        core_dumped,
                    },
                ),
                Ok(WaitStatus::Stopped(pid, signal)) => (pid, ChildState::Stopped(signal as i32)),
                Ok(WaitStatus::Continued(pid)) => (pid, ChildState::Continued),
                Ok(other) => {
                    debug!(status = ?other, "Skipping ptrace child transition");
                    continue;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(SignalError::os("waitpid", e)),
            };
            return Ok(Some(ChildTransition {
                pid: pid.as_raw() as u32,
                state,
            }));
        }
    }
}

impl Drop for OsSignalSource {
    fn drop(&mut self) {
        let _ = WAKE_FD.compare_exchange(
            self.wake.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl SignalDispatcher {
    /// Create a dispatcher wired to real OS signals and start its pump thread.
    ///
    /// Fails with `SourceUnavailable` if another OS-backed dispatcher exists.
    pub fn with_os_signals() -> SignalResult<Arc<Self>> {
        let (source, reader) = OsSignalSource::claim()?;
        let dispatcher = Arc::new(SignalDispatcher::new(Arc::new(source)));
        spawn_pump(reader, Arc::downgrade(&dispatcher))?;
        Ok(dispatcher)
    }

    /// The process-wide OS-backed dispatcher
    pub fn global() -> SignalResult<Arc<Self>> {
        let mut global = GLOBAL.lock();
        if let Some(dispatcher) = global.as_ref() {
            return Ok(Arc::clone(dispatcher));
        }
        let dispatcher = Self::with_os_signals()?;
        *global = Some(Arc::clone(&dispatcher));
        info!("Process-wide signal dispatcher initialized");
        Ok(dispatcher)
    }
}

/// True on the thread that runs listeners for OS deliveries
pub(crate) fn on_signal_thread() -> bool {
    ON_SIGNAL_THREAD.with(Cell::get)
}

/// Keep the read order of a batch, collapsing repeated child-signals into one.
///
/// One child-signal drain covers every queued delivery; other signals are
/// dispatched once per delivery.
fn coalesce(batch: &[u8]) -> Vec<u8> {
    let child = Signal::SIGCHLD.number() as u8;
    let mut seen_child = false;
    batch
        .iter()
        .copied()
        .filter(|&signo| {
            if signo != child {
                return true;
            }
            !std::mem::replace(&mut seen_child, true)
        })
        .collect()
}

fn spawn_pump(mut reader: UnixStream, dispatcher: Weak<SignalDispatcher>) -> SignalResult<()> {
    thread::Builder::new()
        .name("procmux-signals".into())
        .spawn(move || {
            ON_SIGNAL_THREAD.with(|flag| flag.set(true));
            let mut buf = [0u8; 64];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!(error = %e, "Signal pipe read failed");
                        break;
                    }
                };
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };

                for signo in coalesce(&buf[..n]) {
                    let signal = match Signal::from_number(signo as i32) {
                        Ok(signal) => signal,
                        Err(e) => {
                            warn!(error = %e, "Dropping unknown signal number");
                            continue;
                        }
                    };
                    match dispatcher.deliver(signal) {
                        Ok(events) => {
                            if events.iter().any(|event| event.terminate) {
                                info!(signal = %signal, "Listener requested termination");
                                std::process::exit(signal.exit_code());
                            }
                        }
                        Err(e) => error!(signal = %signal, error = %e, "Signal delivery failed"),
                    }
                }
            }
            debug!("Signal pump stopped");
        })
        .map(|_| ())
        .map_err(|e| SignalError::os("spawn signal pump", e))
}
