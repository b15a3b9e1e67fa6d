//! Detector session lifecycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use alerting::{AlertDispatcher, AlertSink, DispatchStats, ShutdownMode};
use camera_capture::FrameSource;
use dms::Perception;
use telemetry::{TelemetrySnapshot, TelemetryStore};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{FramePipeline, PipelineExit};
use crate::publisher::FramePublisher;
use crate::settings::{DetectorSettings, SharedSettings};
use crate::PipelineError;

/// One-shot flag shared across threads
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Collaborators a session is built from
pub struct SessionParts {
    pub source: Box<dyn FrameSource>,
    pub perception: Box<dyn Perception>,
    pub sink: Arc<dyn AlertSink>,
    pub publisher: Box<dyn FramePublisher>,
}

type Worker = JoinHandle<(FramePipeline, Result<PipelineExit, PipelineError>)>;

/// A running detector: the acquisition loop on a blocking worker plus the
/// handles callers use to observe and steer it.
pub struct DetectorSession {
    id: Uuid,
    telemetry: Arc<TelemetryStore>,
    settings: Arc<SharedSettings>,
    dispatch_stats: Arc<DispatchStats>,
    stop: Signal,
    reset: Signal,
    worker: Mutex<Option<Worker>>,
}

impl DetectorSession {
    /// Validate settings and start acquiring. Must be called from within a
    /// tokio runtime; alerts are played on that runtime.
    pub fn start(settings: DetectorSettings, parts: SessionParts) -> Result<Self, PipelineError> {
        let runtime = Handle::try_current().map_err(|e| PipelineError::Setup(e.to_string()))?;
        let settings = Arc::new(SharedSettings::new(settings)?);
        let current = settings.get();

        let telemetry = Arc::new(TelemetryStore::new(current.telemetry(), Instant::now())?);
        let dispatcher = AlertDispatcher::new(current.dispatcher(), parts.sink, runtime.clone());
        let dispatch_stats = dispatcher.stats();

        let mut pipeline = FramePipeline::new(
            parts.perception,
            dispatcher,
            Arc::clone(&telemetry),
            Arc::clone(&settings),
            parts.publisher,
        );
        let reset = pipeline.reset_signal();
        let stop = Signal::new();
        let id = Uuid::new_v4();

        info!(session = %id, "Starting detector session");
        let worker = {
            let stop = stop.clone();
            let mut source = parts.source;
            runtime.spawn_blocking(move || {
                let result = pipeline.run(source.as_mut(), &stop);
                (pipeline, result)
            })
        };

        Ok(Self {
            id,
            telemetry,
            settings,
            dispatch_stats,
            stop,
            reset,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.telemetry.snapshot()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn settings(&self) -> &Arc<SharedSettings> {
        &self.settings
    }

    pub fn dispatch_stats(&self) -> &Arc<DispatchStats> {
        &self.dispatch_stats
    }

    /// Clear the alarm and telemetry before the next frame
    pub fn request_reset(&self) {
        info!(session = %self.id, "Reset requested");
        self.reset.raise();
    }

    /// Whether the acquisition loop has exited
    pub fn is_finished(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |worker| worker.is_finished())
    }

    /// Ask the loop to stop after the current frame, then tear down
    pub async fn stop(&self, mode: ShutdownMode) -> Result<PipelineExit, PipelineError> {
        info!(session = %self.id, "Stopping detector session");
        self.stop.raise();
        self.join(mode).await
    }

    /// Wait for the loop to exit on its own, then tear down.
    ///
    /// Only the first caller gets the outcome; later calls return
    /// [`PipelineError::NotRunning`].
    pub async fn join(&self, mode: ShutdownMode) -> Result<PipelineExit, PipelineError> {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(worker) = worker else {
            return Err(PipelineError::NotRunning);
        };

        let (pipeline, result) = worker.await.map_err(|e| PipelineError::Worker(e.to_string()))?;
        pipeline.shutdown(mode).await;

        match &result {
            Ok(exit) => info!(session = %self.id, "Detector session ended: {:?}", exit),
            Err(e) => warn!(session = %self.id, "Detector session failed: {}", e),
        }
        result
    }
}

impl Drop for DetectorSession {
    fn drop(&mut self) {
        // Let an unjoined worker wind down on its own
        self.stop.raise();
    }
}
