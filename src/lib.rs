/*!
 * procmux
 * Spawn and supervise external processes with asynchronous exit observation
 *
 * Child exits are observed through the child-signal: an OS handler forwards
 * each signal to a pump thread, which reaps every pending child and hands
 * exit codes to the exit observer.
 *
 * The child-signal drain reaps every child of this process, not only those
 * spawned here. Code that waits on its own children must not run while a
 * process spawned through this crate is being tracked.
 */

pub mod config;
pub mod core;
pub mod monitoring;
pub mod process;
pub mod signals;

// Re-exports
pub use crate::core::errors::{ProcessError, Result, StreamError};
pub use crate::core::stream::{ByteStream, MemoryStream};
pub use crate::core::types::{ExitCode, Pid};
pub use config::RuntimeConfig;
pub use monitoring::init_tracing;
pub use process::{
    Command, CommandLine, ExitObserver, OutputIter, Process, ProcessInfo, ProcessResult, StreamId,
    TimeoutSpec,
};
pub use signals::{Signal, SignalDispatcher, SignalError, SignalEvent};
