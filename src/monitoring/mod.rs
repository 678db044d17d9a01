/*!
 * Monitoring
 * Structured logging for spawned processes
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, ProcessSpan};
