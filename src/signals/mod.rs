/*!
 * Signals Module
 * POSIX signal interception and child-exit event synthesis
 */

mod dispatcher;
mod os;
#[doc(hidden)]
pub mod testing;
pub mod traits;
pub mod types;

// Re-export public API
pub use dispatcher::{Listener, SignalDispatcher};
pub use os::OsSignalSource;
pub(crate) use os::on_signal_thread;
pub use traits::SignalSource;
pub use types::{
    ChildState, ChildTransition, ListenerHandle, Signal, SignalCode, SignalError, SignalEvent,
    SignalInfo, SignalResult,
};
