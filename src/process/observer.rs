/*!
 * Exit Observer
 * Pairs child-exit events with exit callbacks, whichever arrives first
 *
 * A child can exit before its spawner attaches a callback. Exit codes that
 * arrive early wait in `pending`; callbacks that arrive early wait in
 * `callbacks`. A pid is never in both maps.
 */

use crate::core::types::{ExitCode, Pid};
use crate::signals::{ListenerHandle, Signal, SignalDispatcher, SignalError, SignalEvent, SignalResult};
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Invoked once with the exit code of the observed child
pub type ExitCallback = Box<dyn FnOnce(ExitCode) + Send>;

static GLOBAL: Mutex<Option<Arc<ExitObserver>>> = parking_lot::const_mutex(None);

#[derive(Default)]
struct ObserverState {
    pending: HashMap<Pid, ExitCode, RandomState>,
    callbacks: HashMap<Pid, ExitCallback, RandomState>,
    active: usize,
    listener: Option<ListenerHandle>,
}

/// Tracks children spawned through this crate until their exit is delivered
pub struct ExitObserver {
    dispatcher: Arc<SignalDispatcher>,
    state: Mutex<ObserverState>,
}

impl ExitObserver {
    pub fn new(dispatcher: Arc<SignalDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            state: Mutex::new(ObserverState::default()),
        })
    }

    /// The process-wide observer bound to the global dispatcher
    pub fn global() -> SignalResult<Arc<Self>> {
        let mut global = GLOBAL.lock();
        if let Some(observer) = global.as_ref() {
            return Ok(Arc::clone(observer));
        }
        let observer = Self::new(SignalDispatcher::global()?);
        *global = Some(Arc::clone(&observer));
        Ok(observer)
    }

    pub fn dispatcher(&self) -> &Arc<SignalDispatcher> {
        &self.dispatcher
    }

    /// Begin tracking one process. Call before spawning it.
    ///
    /// The first active token registers the child-signal listener, so an
    /// exit that happens right after spawn is already observed.
    pub fn start_tracking(self: &Arc<Self>) -> SignalResult<TrackingToken> {
        let mut state = self.state.lock();
        if state.active == 0 {
            let weak: Weak<ExitObserver> = Arc::downgrade(self);
            let handle = self.dispatcher.register(Signal::SIGCHLD, move |event| {
                if let Some(observer) = weak.upgrade() {
                    observer.handle_child_event(event);
                }
            })?;
            state.listener = Some(handle);
            debug!("Child-signal listener registered");
        }
        state.active += 1;

        Ok(TrackingToken {
            observer: Arc::clone(self),
            armed: true,
        })
    }

    /// Attach the exit callback for `pid`.
    ///
    /// Runs `callback` right away if the child already exited. The caller
    /// must hold tracking for `pid`; it is released once the callback runs.
    /// Otherwise the callback runs on the signal pump thread and must not
    /// block on another child's exit.
    pub fn on_exit<F>(&self, pid: Pid, callback: F) -> SignalResult<()>
    where
        F: FnOnce(ExitCode) + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.callbacks.contains_key(&pid) {
            return Err(SignalError::DuplicateExitCallback(pid));
        }

        match state.pending.remove(&pid) {
            Some(code) => {
                drop(state);
                debug!(pid, exit_code = code, "Child exited before its callback was attached");
                callback(code);
                self.stop_tracking();
            }
            None => {
                state.callbacks.insert(pid, Box::new(callback));
            }
        }
        Ok(())
    }

    /// Processes currently tracked
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    /// Exit codes waiting for a callback
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Callbacks waiting for an exit
    pub fn callback_count(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    fn handle_child_event(&self, event: &SignalEvent) {
        let Some((pid, code)) = event.child_exit_code() else {
            return;
        };

        let mut state = self.state.lock();
        if state.active == 0 {
            debug!(pid, "Child exit arrived with nothing tracked");
            return;
        }

        match state.callbacks.remove(&pid) {
            Some(callback) => {
                drop(state);
                callback(code);
                self.stop_tracking();
            }
            None => {
                state.pending.insert(pid, code);
            }
        }
    }

    fn stop_tracking(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.active > 0 {
            return;
        }

        // The child-signal reports every child of this process, not only ours
        let stale = state.pending.len();
        state.pending.clear();
        if let Some(handle) = state.listener.take() {
            self.dispatcher.unregister(handle);
        }
        info!(stale_exits = stale, "No tracked processes left, child-signal listener removed");
    }
}

/// Proof that tracking was started; releases it on drop unless consumed
#[must_use = "dropping the token stops tracking"]
pub struct TrackingToken {
    observer: Arc<ExitObserver>,
    armed: bool,
}

impl TrackingToken {
    /// Hand tracking over to the exit callback of `pid`
    pub fn on_exit<F>(mut self, pid: Pid, callback: F) -> SignalResult<()>
    where
        F: FnOnce(ExitCode) + Send + 'static,
    {
        self.observer.on_exit(pid, callback)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TrackingToken {
    fn drop(&mut self) {
        if self.armed {
            self.observer.stop_tracking();
        }
    }
}
