/*!
 * Signal Traits
 * Seam between the listener registry and the operating system
 */

use super::types::{ChildTransition, Signal, SignalResult};

/// OS-facing half of signal handling.
///
/// The dispatcher calls `install` when a signal gains its first listener and
/// `uninstall` when it loses its last one. `next_child_transition` is polled
/// in a loop after every child-signal until it returns `None`.
pub trait SignalSource: Send + Sync {
    /// Route deliveries of `signal` to the dispatcher
    fn install(&self, signal: Signal) -> SignalResult<()>;

    /// Restore the default disposition of `signal`
    fn uninstall(&self, signal: Signal) -> SignalResult<()>;

    /// Reap one pending child state change without blocking
    fn next_child_transition(&self) -> SignalResult<Option<ChildTransition>>;
}
