//! Frame Pipeline Implementation

use std::sync::Arc;
use std::time::{Duration, Instant};

use alerting::{AlertDispatcher, ShutdownMode};
use camera_capture::{FrameSource, VideoFrame};
use dms::{AlertEvent, AlertKind, AlertState, DrowsinessStateMachine, OpennessSample, Perception};
use telemetry::{FrameRecord, TelemetryStore};
use tracing::{debug, error, info, warn};

use crate::publisher::{draw_alert_border, AnnotatedFrame, FramePublisher};
use crate::session::Signal;
use crate::settings::SharedSettings;
use crate::PipelineError;

/// Why the acquisition loop returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// The source reported end of stream
    EndOfStream,
    /// A stop was requested
    Stopped,
}

/// Summary of one processed frame
#[derive(Debug, Clone, Copy)]
pub struct FrameReport {
    pub sample: OpennessSample,
    pub state: AlertState,
    pub event: Option<AlertEvent>,
}

/// Single-threaded per-frame processing.
///
/// Owns the state machine and dispatcher; shares telemetry and settings
/// with the outside world.
pub struct FramePipeline {
    perception: Box<dyn Perception>,
    state_machine: DrowsinessStateMachine,
    dispatcher: AlertDispatcher,
    telemetry: Arc<TelemetryStore>,
    settings: Arc<SharedSettings>,
    applied_version: u64,
    annotate: bool,
    publisher: Box<dyn FramePublisher>,
    reset: Signal,
    last_timestamp: Option<Instant>,
    frames_processed: u64,
}

impl FramePipeline {
    /// Create a pipeline using the current settings
    pub fn new(
        perception: Box<dyn Perception>,
        mut dispatcher: AlertDispatcher,
        telemetry: Arc<TelemetryStore>,
        settings: Arc<SharedSettings>,
        publisher: Box<dyn FramePublisher>,
    ) -> Self {
        let applied_version = settings.version();
        let current = settings.get();
        dispatcher.set_config(current.dispatcher());

        Self {
            perception,
            state_machine: DrowsinessStateMachine::new(current.state_machine()),
            dispatcher,
            telemetry,
            settings,
            applied_version,
            annotate: current.annotate_frames,
            publisher,
            reset: Signal::new(),
            last_timestamp: None,
            frames_processed: 0,
        }
    }

    /// Raising this signal resets the alarm before the next frame
    pub fn reset_signal(&self) -> Signal {
        self.reset.clone()
    }

    pub fn state(&self) -> AlertState {
        self.state_machine.state()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn apply_pending(&mut self) {
        if self.reset.take() {
            info!("Manual reset: alarm and telemetry cleared");
            self.dispatcher.stop_active();
            self.state_machine.reset();
            self.telemetry.reset();
        }

        let version = self.settings.version();
        if version == self.applied_version {
            return;
        }
        let current = self.settings.get();
        self.state_machine.set_config(current.state_machine());
        self.dispatcher.set_config(current.dispatcher());
        if let Err(e) = self.telemetry.set_capacities(current.telemetry()) {
            warn!("Keeping previous telemetry capacities: {}", e);
        }
        self.annotate = current.annotate_frames;
        self.applied_version = version;
        debug!("Applied settings version {}", version);
    }

    /// Frame time on the monotonic clock, never earlier than the previous one
    fn timestamp_for(&mut self, frame: &VideoFrame) -> Instant {
        let candidate = self.telemetry.epoch() + Duration::from_nanos(frame.timestamp_ns);
        let timestamp = match self.last_timestamp {
            Some(last) if candidate < last => {
                debug!("Frame {} timestamp went backwards, holding previous", frame.sequence);
                last
            }
            _ => candidate,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Run one frame through perception, the state machine, dispatch and telemetry
    pub fn process_frame(&mut self, frame: VideoFrame) -> FrameReport {
        let started = Instant::now();
        self.apply_pending();
        let timestamp = self.timestamp_for(&frame);

        let (face_present, raw) = match self.perception.detect(&frame) {
            Ok(faces) => match faces.first() {
                Some(face) => (true, face.openness()),
                None => (false, 0.0),
            },
            Err(e) => {
                debug!("Perception failed on frame {}: {}", frame.sequence, e);
                metrics::counter!("dms_perception_failures_total").increment(1);
                (false, 0.0)
            }
        };
        if !face_present {
            metrics::counter!("dms_face_missing_total").increment(1);
        }
        if raw > 1.0 {
            debug!("Openness {:.3} above 1 on frame {}", raw, frame.sequence);
        }

        let sample = OpennessSample::new(raw.clamp(0.0, 1.0), timestamp, face_present);
        let event = self.state_machine.observe(sample);
        if let Some(event) = &event {
            if event.kind == AlertKind::Raised {
                metrics::counter!("dms_alerts_raised_total").increment(1);
            }
            let outcome = self.dispatcher.on_event(event);
            debug!("{:?} event dispatched: {:?}", event.kind, outcome);
        }

        let state = self.state_machine.state();
        self.telemetry.record_frame(FrameRecord {
            sample,
            state,
            closed_since: self.state_machine.closed_since(),
            alert_in: self.state_machine.alert_in(timestamp),
            event,
        });
        self.frames_processed += 1;

        let mut annotated = AnnotatedFrame {
            frame,
            sample,
            raw_openness: raw,
            state,
            closed_for: self.state_machine.closed_for(timestamp),
            event,
        };
        if self.annotate && state == AlertState::Alerting {
            draw_alert_border(&mut annotated.frame);
        }
        self.publisher.publish(annotated);

        metrics::counter!("dms_frames_processed_total").increment(1);
        metrics::gauge!("dms_eye_openness").set(sample.value as f64);
        metrics::histogram!("dms_frame_processing_seconds")
            .record(started.elapsed().as_secs_f64());

        FrameReport { sample, state, event }
    }

    /// Run the acquisition loop until the stream ends, fails, or `stop` is raised.
    /// The source is closed on every exit path.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &Signal,
    ) -> Result<PipelineExit, PipelineError> {
        info!("Starting frame pipeline");

        let result = loop {
            if stop.is_raised() {
                break Ok(PipelineExit::Stopped);
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(frame);
                }
                Ok(None) if stop.is_raised() => break Ok(PipelineExit::Stopped),
                Ok(None) => {
                    info!("Frame source reached end of stream");
                    break Ok(PipelineExit::EndOfStream);
                }
                Err(e) => {
                    error!("Frame acquisition failed: {}", e);
                    break Err(PipelineError::Acquisition(e));
                }
            }
        };

        source.close();
        info!("Frame pipeline stopped after {} frames", self.frames_processed);
        result
    }

    /// Release the dispatcher, draining or stopping in-flight alerts
    pub async fn shutdown(self, mode: ShutdownMode) {
        self.dispatcher.shutdown(mode).await;
    }
}
