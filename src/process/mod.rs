/*!
 * Process Module
 * Command building, spawning, exit observation and output capture
 */

pub mod command;
pub mod hooks;
pub mod observer;
pub mod output;
pub mod result;
pub mod runner;
pub mod types;

// Re-export for convenience
pub use command::Command;
pub use hooks::{FinishedHook, ProcessHooks, StartedHook};
pub use observer::{ExitCallback, ExitObserver, TrackingToken};
pub use output::OutputIter;
pub use result::ProcessResult;
pub use runner::Process;
pub use types::{format_seconds, CommandLine, ProcessInfo, StreamId, TimeoutSpec};
