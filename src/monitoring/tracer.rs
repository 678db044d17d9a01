/*!
 * Tracing
 * Subscriber setup and per-process spans using the tracing crate
 *
 * Features:
 * - Correlation id per spawned process
 * - JSON-formatted logs for structured parsing
 * - Exit code and runtime recorded when the process is reaped
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - PROCMUX_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("PROCMUX_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        debug!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique id for correlating one process's log lines
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one process from spawn to reap
pub struct ProcessSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl ProcessSpan {
    pub fn new(pid: u32, command: &str) -> Self {
        let trace_id = generate_trace_id();

        let span = span!(
            Level::INFO,
            "process",
            trace_id = %trace_id,
            pid = pid,
            command = command,
            exit_code = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let _entered = span.enter();
        info!(pid, command, "Process started");
        drop(_entered);

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Record the reaped exit code and total runtime
    pub fn finish(&self, exit_code: i32, expected: bool) {
        let duration = self.start.elapsed();
        self.span.record("exit_code", exit_code);
        self.span.record("duration_ms", duration.as_millis() as u64);

        let _entered = self.span.enter();
        if expected {
            info!(
                trace_id = %self.trace_id,
                exit_code,
                duration_ms = duration.as_millis() as u64,
                "Process finished"
            );
        } else {
            warn!(
                trace_id = %self.trace_id,
                exit_code,
                duration_ms = duration.as_millis() as u64,
                "Process exited with unexpected code"
            );
        }
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
