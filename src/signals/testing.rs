/*!
 * Scripted Signal Source
 * In-memory `SignalSource` for exercising the registry without the OS
 */

use super::traits::SignalSource;
use super::types::{ChildTransition, Signal, SignalResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Call made by the dispatcher against its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCall {
    Install(Signal),
    Uninstall(Signal),
}

/// Records install/uninstall calls and replays queued child transitions
#[derive(Debug, Default)]
pub struct ScriptedSource {
    calls: Mutex<Vec<SourceCall>>,
    transitions: Mutex<VecDeque<ChildTransition>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a child transition for the next child-signal drain
    pub fn push_transition(&self, transition: ChildTransition) {
        self.transitions.lock().push_back(transition);
    }

    /// Transitions not yet reaped
    pub fn pending_transitions(&self) -> usize {
        self.transitions.lock().len()
    }

    /// Every install/uninstall call so far
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().clone()
    }

    /// Signals whose handler is currently installed
    pub fn installed(&self) -> Vec<Signal> {
        let mut installed = Vec::new();
        for call in self.calls.lock().iter() {
            match *call {
                SourceCall::Install(signal) => installed.push(signal),
                SourceCall::Uninstall(signal) => installed.retain(|s| *s != signal),
            }
        }
        installed
    }
}

impl SignalSource for ScriptedSource {
    fn install(&self, signal: Signal) -> SignalResult<()> {
        self.calls.lock().push(SourceCall::Install(signal));
        Ok(())
    }

    fn uninstall(&self, signal: Signal) -> SignalResult<()> {
        self.calls.lock().push(SourceCall::Uninstall(signal));
        Ok(())
    }

    fn next_child_transition(&self) -> SignalResult<Option<ChildTransition>> {
        Ok(self.transitions.lock().pop_front())
    }
}
