//! Alert Dispatcher Implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dms::{AlertEvent, AlertKind};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::AlertSink;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Minimum time between two alert plays (default: 2s)
    pub rearm_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rearm_interval: Duration::from_secs(2),
        }
    }
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A play was spawned
    Dispatched,
    /// Raised inside the re-arm interval, nothing played
    Suppressed,
    /// Running plays were stopped
    StopRequested,
    /// Cleared with nothing playing
    Ignored,
}

/// How to treat in-flight plays on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let running plays finish
    Drain,
    /// Stop running plays, then wait
    Stop,
}

/// Dispatch counters, shared with the spawned play tasks
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    suppressed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub suppressed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Plays alerts for Raised events, at most once per re-arm interval.
///
/// Stopping a play aborts its task, which drops the sink's play future.
/// This works even if the task has not been polled yet.
pub struct AlertDispatcher {
    /// Configuration
    config: DispatcherConfig,
    /// Alert capability
    sink: Arc<dyn AlertSink>,
    /// Runtime the plays are spawned on
    runtime: Handle,
    /// Timestamp of the last spawned play
    last_dispatch: Option<Instant>,
    /// Plays not yet known to be finished
    in_flight: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl AlertDispatcher {
    /// Create a new dispatcher spawning onto `runtime`
    pub fn new(config: DispatcherConfig, sink: Arc<dyn AlertSink>, runtime: Handle) -> Self {
        info!(
            "Creating alert dispatcher: sink={}, rearm={:?}",
            sink.name(),
            config.rearm_interval
        );
        Self {
            config,
            sink,
            runtime,
            last_dispatch: None,
            in_flight: Vec::new(),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Handle an alert event without blocking
    pub fn on_event(&mut self, event: &AlertEvent) -> DispatchOutcome {
        self.in_flight.retain(|task| !task.is_finished());

        match event.kind {
            AlertKind::Raised => self.raise(event.timestamp),
            AlertKind::Cleared => {
                if self.stop_active() > 0 {
                    DispatchOutcome::StopRequested
                } else {
                    DispatchOutcome::Ignored
                }
            }
        }
    }

    fn raise(&mut self, now: Instant) -> DispatchOutcome {
        if let Some(last) = self.last_dispatch {
            let since = now.saturating_duration_since(last);
            if since <= self.config.rearm_interval {
                debug!("Alert suppressed: {:?} since last dispatch", since);
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("dms_alerts_suppressed_total").increment(1);
                return DispatchOutcome::Suppressed;
            }
        }

        // Recorded before the play resolves so rapid re-entry cannot overlap
        self.last_dispatch = Some(now);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dms_alerts_dispatched_total").increment(1);

        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        let task = self.runtime.spawn(async move {
            match sink.play().await {
                Ok(()) => {
                    stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!("Alert played via {}", sink.name());
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("dms_alert_dispatch_failures_total").increment(1);
                    warn!("Alert playback failed on {}: {}", sink.name(), e);
                }
            }
        });
        self.in_flight.push(task);

        DispatchOutcome::Dispatched
    }

    /// Stop every running play, returning how many were stopped
    pub fn stop_active(&mut self) -> usize {
        let mut stopped = 0;
        for task in &self.in_flight {
            if !task.is_finished() {
                task.abort();
                stopped += 1;
            }
        }
        if stopped > 0 {
            debug!("Stopped {} alert play(s) on {}", stopped, self.sink.name());
        }
        stopped
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Takes effect on the next Raised event
    pub fn set_config(&mut self, config: DispatcherConfig) {
        self.config = config;
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    /// Shared counters, readable from any thread
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Number of plays that may still be running
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|task| !task.is_finished()).count()
    }

    /// Wait for every in-flight play, stopping them first if asked
    pub async fn shutdown(mut self, mode: ShutdownMode) {
        info!("Shutting down alert dispatcher ({:?}, {} in flight)", mode, self.in_flight());

        if mode == ShutdownMode::Stop {
            self.stop_active();
        }

        for task in self.in_flight {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!("Alert play stopped before completion"),
                Err(e) => warn!("Alert task ended abnormally: {}", e),
            }
        }
    }
}
