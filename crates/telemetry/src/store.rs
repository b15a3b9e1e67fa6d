//! Telemetry Store Implementation

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dms::{AlertEvent, AlertKind, AlertState, OpennessSample};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::TelemetryError;

/// History capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Openness samples kept (default: 100)
    pub sample_capacity: usize,
    /// Alert events kept (default: 50)
    pub event_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 100,
            event_capacity: 50,
        }
    }
}

/// Everything the acquisition loop commits for one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord {
    pub sample: OpennessSample,
    pub state: AlertState,
    /// Start of the current closed episode, if any
    pub closed_since: Option<Instant>,
    /// Time left before the closed episode escalates, while Closing
    pub alert_in: Option<Duration>,
    pub event: Option<AlertEvent>,
}

/// Immutable point-in-time view of the store
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    /// Oldest first
    pub openness_history: Vec<OpennessSample>,
    /// Oldest first
    pub alert_history: Vec<AlertEvent>,
    pub current_state: AlertState,
    pub closed_since: Option<Instant>,
    /// Countdown to the next alert as of the latest sample
    pub alert_in: Option<Duration>,
    /// Frames recorded since the session started or was reset
    pub frames_recorded: u64,
    /// Raised events since the session started or was reset, not bounded by the history
    pub alerts_raised: u64,
    pub sample_capacity: usize,
    pub event_capacity: usize,
    /// Monotonic origin of the session
    pub epoch: Instant,
    /// Wall-clock time matching `epoch`
    pub started_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn latest_sample(&self) -> Option<&OpennessSample> {
        self.openness_history.last()
    }

    /// Closed time as of the latest sample
    pub fn closed_for(&self) -> Duration {
        match (self.closed_since, self.latest_sample()) {
            (Some(since), Some(latest)) => latest.timestamp.saturating_duration_since(since),
            _ => Duration::ZERO,
        }
    }

    /// Mean openness over the retained samples that had a face
    pub fn average_openness(&self) -> Option<f32> {
        let (sum, count) = self
            .openness_history
            .iter()
            .filter(|s| s.face_present)
            .fold((0.0f32, 0u32), |(sum, count), s| (sum + s.value, count + 1));
        (count > 0).then(|| sum / count as f32)
    }
}

struct Histories {
    samples: RingBuffer<OpennessSample>,
    events: RingBuffer<AlertEvent>,
    state: AlertState,
    closed_since: Option<Instant>,
    alert_in: Option<Duration>,
    frames_recorded: u64,
    alerts_raised: u64,
}

impl Histories {
    fn push_event(&mut self, event: AlertEvent) {
        if event.kind == AlertKind::Raised {
            self.alerts_raised += 1;
        }
        self.events.push(event);
    }

    fn push_sample(&mut self, sample: OpennessSample) {
        self.frames_recorded += 1;
        self.samples.push(sample);
    }
}

/// Session telemetry.
///
/// Writers mutate the histories under a mutex and publish a fresh
/// [`TelemetrySnapshot`]; readers only clone the published `Arc`.
pub struct TelemetryStore {
    epoch: Instant,
    started_at: DateTime<Utc>,
    inner: Mutex<Histories>,
    published: RwLock<Arc<TelemetrySnapshot>>,
}

impl TelemetryStore {
    /// Create an empty store whose timestamps are relative to `epoch`
    pub fn new(config: TelemetryConfig, epoch: Instant) -> Result<Self, TelemetryError> {
        info!(
            "Creating telemetry store: {} samples, {} events",
            config.sample_capacity, config.event_capacity
        );
        let inner = Histories {
            samples: RingBuffer::new(config.sample_capacity)?,
            events: RingBuffer::new(config.event_capacity)?,
            state: AlertState::Open,
            closed_since: None,
            alert_in: None,
            frames_recorded: 0,
            alerts_raised: 0,
        };
        let started_at = Utc::now();
        let published = RwLock::new(Arc::new(Self::build(&inner, epoch, started_at)));

        Ok(Self {
            epoch,
            started_at,
            inner: Mutex::new(inner),
            published,
        })
    }

    fn build(inner: &Histories, epoch: Instant, started_at: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            openness_history: inner.samples.to_vec(),
            alert_history: inner.events.to_vec(),
            current_state: inner.state,
            closed_since: inner.closed_since,
            alert_in: inner.alert_in,
            frames_recorded: inner.frames_recorded,
            alerts_raised: inner.alerts_raised,
            sample_capacity: inner.samples.capacity(),
            event_capacity: inner.events.capacity(),
            epoch,
            started_at,
        }
    }

    /// Apply a mutation and publish the result as one snapshot
    fn update<R>(&self, f: impl FnOnce(&mut Histories) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut inner);
        let snapshot = Arc::new(Self::build(&inner, self.epoch, self.started_at));
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        result
    }

    pub fn record_sample(&self, sample: OpennessSample) {
        self.update(|h| h.push_sample(sample));
    }

    pub fn record_event(&self, event: AlertEvent) {
        self.update(|h| h.push_event(event));
    }

    /// Commit one processed frame atomically
    pub fn record_frame(&self, frame: FrameRecord) {
        self.update(|h| {
            if let Some(event) = frame.event {
                h.push_event(event);
            }
            h.push_sample(frame.sample);
            h.state = frame.state;
            h.closed_since = frame.closed_since;
            h.alert_in = frame.alert_in;
        });
    }

    /// Latest published view
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*published)
    }

    pub fn current_state(&self) -> AlertState {
        self.snapshot().current_state
    }

    /// Resize both histories; shrinking drops the oldest entries
    pub fn set_capacities(&self, config: TelemetryConfig) -> Result<(), TelemetryError> {
        self.update(|h| {
            if h.samples.capacity() == config.sample_capacity
                && h.events.capacity() == config.event_capacity
            {
                return Ok(());
            }
            debug!(
                "Resizing telemetry: {} samples, {} events",
                config.sample_capacity, config.event_capacity
            );
            // Validate both before touching either
            if config.sample_capacity == 0 || config.event_capacity == 0 {
                return Err(ring_buffer::RingBufferError::ZeroCapacity.into());
            }
            h.samples.set_capacity(config.sample_capacity)?;
            h.events.set_capacity(config.event_capacity)?;
            Ok(())
        })
    }

    /// Clear histories and counters
    pub fn reset(&self) {
        info!("Resetting telemetry");
        self.update(|h| {
            h.samples.clear();
            h.events.clear();
            h.state = AlertState::Open;
            h.closed_since = None;
            h.alert_in = None;
            h.frames_recorded = 0;
            h.alerts_raised = 0;
        });
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}
