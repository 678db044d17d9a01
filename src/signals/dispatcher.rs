/*!
 * Signal Dispatcher
 * Per-signal listener registry with lazy OS handler installation
 */

use super::traits::SignalSource;
use super::types::{
    ChildState, ListenerHandle, Signal, SignalError, SignalEvent, SignalInfo, SignalResult,
};
use ahash::RandomState;
use dashmap::mapref::entry::{Entry, OccupiedEntry};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Listener callback; may toggle `event.terminate`
pub type Listener = Arc<dyn Fn(&mut SignalEvent) + Send + Sync>;

/// Listeners of one signal.
///
/// A slot exists exactly while the OS handler for its signal is installed.
struct SignalSlot {
    listeners: Vec<(u64, Listener)>,
    /// Dispatches in flight; the slot outlives them even when emptied
    dispatching: usize,
}

impl SignalSlot {
    fn is_idle(&self) -> bool {
        self.listeners.is_empty() && self.dispatching == 0
    }
}

/// Process-wide registry mapping signals to ordered listener lists
pub struct SignalDispatcher {
    slots: DashMap<Signal, SignalSlot, RandomState>,
    source: Arc<dyn SignalSource>,
    next_id: AtomicU64,
    reaping: RwLock<()>,
}

impl SignalDispatcher {
    /// Create a dispatcher over the given OS seam
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
            source,
            next_id: AtomicU64::new(1),
            reaping: RwLock::new(()),
        }
    }

    /// Register a listener, installing the OS handler on the first one
    pub fn register<F>(&self, signal: Signal, listener: F) -> SignalResult<ListenerHandle>
    where
        F: Fn(&mut SignalEvent) + Send + Sync + 'static,
    {
        if !signal.is_interceptable() {
            warn!(signal = %signal, "Refusing to intercept signal");
            return Err(SignalError::Uninterceptable(signal));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let listener: Listener = Arc::new(listener);

        match self.slots.entry(signal) {
            Entry::Occupied(mut slot) => slot.get_mut().listeners.push((id, listener)),
            Entry::Vacant(vacant) => {
                self.source.install(signal)?;
                vacant.insert(SignalSlot {
                    listeners: vec![(id, listener)],
                    dispatching: 0,
                });
                info!(signal = %signal, "Installed OS signal handler");
            }
        }

        debug!(signal = %signal, listener = id, "Registered signal listener");
        Ok(ListenerHandle { signal, id })
    }

    /// Remove a listener, returning how many entries were removed.
    ///
    /// Removing the last listener restores the default disposition, unless
    /// the signal is being dispatched; then it happens when dispatch ends.
    pub fn unregister(&self, handle: ListenerHandle) -> usize {
        let Entry::Occupied(mut slot) = self.slots.entry(handle.signal) else {
            return 0;
        };

        let listeners = &mut slot.get_mut().listeners;
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.id);
        let removed = before - listeners.len();

        if removed > 0 {
            debug!(signal = %handle.signal, listener = handle.id, "Unregistered signal listener");
        }
        if slot.get().is_idle() {
            self.release(slot);
        }
        removed
    }

    /// Run every listener of `signal` against one event, in registration order.
    ///
    /// Listeners see the list as it was when dispatch started; changes they
    /// make to the registry apply from the next dispatch on.
    pub fn dispatch(&self, signal: Signal, info: SignalInfo) -> SignalEvent {
        let mut event = SignalEvent::new(signal, info);

        let snapshot: Vec<Listener> = match self.slots.get_mut(&signal) {
            Some(mut slot) => {
                slot.dispatching += 1;
                slot.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
            }
            None => {
                debug!(signal = %signal, "No listeners for signal");
                return event;
            }
        };

        let _in_flight = DispatchGuard {
            dispatcher: self,
            signal,
        };
        for listener in &snapshot {
            listener(&mut event);
        }

        event
    }

    /// Entry point for an OS notification of `signal`.
    ///
    /// For the child-signal every pending child transition is drained and
    /// turned into its own event; stopped and continued children are skipped.
    pub fn deliver(&self, signal: Signal) -> SignalResult<Vec<SignalEvent>> {
        if signal != Signal::SIGCHLD {
            return Ok(vec![self.dispatch(signal, SignalInfo::user())]);
        }

        let mut events = Vec::new();
        loop {
            let transition = {
                let _exclusive = self.reaping.write();
                self.source.next_child_transition()?
            };
            let Some(transition) = transition else {
                break;
            };

            match transition.state {
                ChildState::Stopped(_) | ChildState::Continued => {
                    debug!(pid = transition.pid, state = ?transition.state, "Ignoring job-control transition");
                }
                ChildState::Exited(_) | ChildState::Killed { .. } => {
                    events.push(self.dispatch(Signal::SIGCHLD, transition.into()));
                }
            }
        }
        Ok(events)
    }

    /// Keep child reaping paused while the guard lives.
    ///
    /// Spawning holds this so a failed exec reaped by the standard library
    /// is never stolen by the child-signal drain.
    pub fn hold_reaping(&self) -> RwLockReadGuard<'_, ()> {
        self.reaping.read()
    }

    /// Whether the OS handler for `signal` is currently installed
    pub fn is_registered(&self, signal: Signal) -> bool {
        self.slots.contains_key(&signal)
    }

    /// Number of listeners currently registered for `signal`
    pub fn listener_count(&self, signal: Signal) -> usize {
        self.slots
            .get(&signal)
            .map(|slot| slot.listeners.len())
            .unwrap_or(0)
    }

    /// Signals with an installed handler, in ascending order
    pub fn registered_signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.slots.iter().map(|entry| *entry.key()).collect();
        signals.sort();
        signals
    }

    fn release(&self, slot: OccupiedEntry<'_, Signal, SignalSlot, RandomState>) {
        let signal = *slot.key();
        if let Err(e) = self.source.uninstall(signal) {
            warn!(signal = %signal, error = %e, "Failed to restore default signal disposition");
        }
        slot.remove();
        info!(signal = %signal, "Removed OS signal handler");
    }

    fn finish_dispatch(&self, signal: Signal) {
        if let Entry::Occupied(mut slot) = self.slots.entry(signal) {
            let state = slot.get_mut();
            state.dispatching = state.dispatching.saturating_sub(1);
            if state.is_idle() {
                self.release(slot);
            }
        }
    }
}

/// Ends a dispatch even if a listener panics
struct DispatchGuard<'a> {
    dispatcher: &'a SignalDispatcher,
    signal: Signal,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.finish_dispatch(self.signal);
    }
}
