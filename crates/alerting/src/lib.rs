//! Alerting System
//!
//! Turns drowsiness alert events into audible alerts: re-arm interval
//! enforcement, fire-and-forget dispatch on the async runtime, and ordered
//! fallback between alert sinks.

mod dispatcher;
mod sink;

pub use dispatcher::{
    AlertDispatcher, DispatchOutcome, DispatchStats, DispatchStatsSnapshot, DispatcherConfig,
    ShutdownMode,
};
pub use sink::{AlertSink, BellSink, CommandSink, FallbackChain, LogSink, SinkSpec};

use thiserror::Error;

/// One sink's failure inside a fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub sink: String,
    pub reason: String,
}

/// Alert playback errors
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert device unavailable: {0}")]
    Unavailable(String),

    #[error("Alert command failed: {0}")]
    Command(String),

    #[error("Alert I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("All alert sinks failed: {}", summarize(.0))]
    Exhausted(Vec<SinkFailure>),
}

fn summarize(failures: &[SinkFailure]) -> String {
    if failures.is_empty() {
        return "no sinks configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({})", f.sink, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
