/*!
 * Process Hooks
 * Fire-and-forget notifications for process start and finish
 */

use super::types::ProcessInfo;
use crate::core::types::ExitCode;
use std::fmt;
use std::sync::Arc;

pub type StartedHook = Arc<dyn Fn(&ProcessInfo) + Send + Sync>;
pub type FinishedHook = Arc<dyn Fn(&ProcessInfo, ExitCode) + Send + Sync>;

/// Subscribers attached to a command
#[derive(Clone, Default)]
pub struct ProcessHooks {
    started: Vec<StartedHook>,
    finished: Vec<FinishedHook>,
}

impl ProcessHooks {
    pub fn on_started<F>(&mut self, hook: F)
    where
        F: Fn(&ProcessInfo) + Send + Sync + 'static,
    {
        self.started.push(Arc::new(hook));
    }

    pub fn on_finished<F>(&mut self, hook: F)
    where
        F: Fn(&ProcessInfo, ExitCode) + Send + Sync + 'static,
    {
        self.finished.push(Arc::new(hook));
    }

    pub(crate) fn emit_started(&self, info: &ProcessInfo) {
        for hook in &self.started {
            hook(info);
        }
    }

    pub(crate) fn has_finished(&self) -> bool {
        !self.finished.is_empty()
    }

    pub(crate) fn emit_finished(&self, info: &ProcessInfo, exit_code: ExitCode) {
        for hook in &self.finished {
            hook(info, exit_code);
        }
    }
}

impl fmt::Debug for ProcessHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHooks")
            .field("started", &self.started.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}
