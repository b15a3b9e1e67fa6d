//! Drowsiness state tracking

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StateMachineConfig;

/// Alert state of a running detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// Eyes open, or no usable face
    #[default]
    Open,
    /// Eyes closed, sustained duration not yet reached
    Closing,
    /// Eyes closed for at least the sustained duration
    Alerting,
}

/// One processed frame's openness measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpennessSample {
    /// Normalized openness in [0, 1]
    pub value: f32,
    /// Monotonic capture time
    pub timestamp: Instant,
    /// Whether perception returned a face for this frame
    pub face_present: bool,
}

impl OpennessSample {
    pub fn new(value: f32, timestamp: Instant, face_present: bool) -> Self {
        Self {
            value,
            timestamp,
            face_present,
        }
    }

    /// Sample for a frame where no face was found
    pub fn absent(timestamp: Instant) -> Self {
        Self::new(0.0, timestamp, false)
    }
}

/// Direction of an alert transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Raised,
    Cleared,
}

/// Emitted on entering or leaving [`AlertState::Alerting`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertEvent {
    pub timestamp: Instant,
    pub openness_at_trigger: f32,
    pub kind: AlertKind,
}

/// Time-based hysteresis over the openness signal.
///
/// Not internally synchronized: exactly one acquisition loop owns it.
#[derive(Debug, Clone)]
pub struct DrowsinessStateMachine {
    config: StateMachineConfig,
    state: AlertState,
    closed_since: Option<Instant>,
}

impl DrowsinessStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        Self {
            config,
            state: AlertState::Open,
            closed_since: None,
        }
    }

    /// Feed one sample, returning an event if the alert state was entered or left
    pub fn observe(&mut self, sample: OpennessSample) -> Option<AlertEvent> {
        if !sample.face_present || sample.value >= self.config.ear_threshold {
            return self.open(sample);
        }

        let Some(closed_since) = self.closed_since else {
            debug!("Eyes closed (openness {:.3}), starting timer", sample.value);
            self.closed_since = Some(sample.timestamp);
            self.state = AlertState::Closing;
            return None;
        };

        let elapsed = sample.timestamp.saturating_duration_since(closed_since);
        if elapsed >= self.config.sustained_duration && self.state != AlertState::Alerting {
            info!(
                "Drowsiness alert raised: eyes closed for {:.2}s (openness {:.3})",
                elapsed.as_secs_f32(),
                sample.value
            );
            self.state = AlertState::Alerting;
            return Some(AlertEvent {
                timestamp: sample.timestamp,
                openness_at_trigger: sample.value,
                kind: AlertKind::Raised,
            });
        }

        None
    }

    fn open(&mut self, sample: OpennessSample) -> Option<AlertEvent> {
        let was_alerting = self.state == AlertState::Alerting;
        if self.closed_since.is_some() {
            if sample.face_present {
                debug!("Eyes opened, resetting timer");
            } else {
                debug!("Face lost, resetting timer");
            }
        }

        self.state = AlertState::Open;
        self.closed_since = None;

        if was_alerting {
            info!("Drowsiness alert cleared (openness {:.3})", sample.value);
            Some(AlertEvent {
                timestamp: sample.timestamp,
                openness_at_trigger: sample.value,
                kind: AlertKind::Cleared,
            })
        } else {
            None
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Start of the current closed episode
    pub fn closed_since(&self) -> Option<Instant> {
        self.closed_since
    }

    /// How long the eyes have been closed as of `now`
    pub fn closed_for(&self, now: Instant) -> Duration {
        self.closed_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    /// Time left before a Closing episode escalates, as of `now`.
    /// `None` unless the state is Closing.
    pub fn alert_in(&self, now: Instant) -> Option<Duration> {
        (self.state == AlertState::Closing)
            .then(|| self.config.sustained_duration.saturating_sub(self.closed_for(now)))
    }

    pub fn config(&self) -> StateMachineConfig {
        self.config
    }

    /// Replace the config; the running closed timer is kept as-is
    pub fn set_config(&mut self, config: StateMachineConfig) {
        if config != self.config {
            info!(
                "State machine reconfigured: threshold={:.3}, sustained={:?}",
                config.ear_threshold, config.sustained_duration
            );
        }
        self.config = config;
    }

    /// Manual alarm reset. No event is emitted.
    pub fn reset(&mut self) {
        self.state = AlertState::Open;
        self.closed_since = None;
    }
}

impl Default for DrowsinessStateMachine {
    fn default() -> Self {
        Self::new(StateMachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn machine() -> (DrowsinessStateMachine, Instant) {
        let config = StateMachineConfig::new(0.25, Duration::from_secs(2));
        (DrowsinessStateMachine::new(config), Instant::now())
    }

    fn at(t0: Instant, secs: f64) -> Instant {
        t0 + Duration::from_secs_f64(secs)
    }

    fn closed(t0: Instant, secs: f64) -> OpennessSample {
        OpennessSample::new(0.10, at(t0, secs), true)
    }

    #[test]
    fn test_alert_after_sustained_closure() {
        let (mut sm, t0) = machine();

        for secs in [0.0, 0.5, 1.0, 1.5] {
            assert!(sm.observe(closed(t0, secs)).is_none());
            assert_eq!(sm.state(), AlertState::Closing, "t={secs}");
        }

        let event = sm.observe(closed(t0, 2.0)).unwrap();
        assert_eq!(event.kind, AlertKind::Raised);
        assert_eq!(event.timestamp, at(t0, 2.0));
        assert!((event.openness_at_trigger - 0.10).abs() < f32::EPSILON);
        assert_eq!(sm.state(), AlertState::Alerting);

        assert!(sm.observe(closed(t0, 2.5)).is_none());
        assert_eq!(sm.state(), AlertState::Alerting);
    }

    #[test]
    fn test_opening_before_duration_cancels() {
        let (mut sm, t0) = machine();

        for secs in [0.0, 0.5, 1.0, 1.5] {
            assert!(sm.observe(closed(t0, secs)).is_none());
        }

        let event = sm.observe(OpennessSample::new(0.30, at(t0, 1.6), true));
        assert!(event.is_none());
        assert_eq!(sm.state(), AlertState::Open);
        assert!(sm.closed_since().is_none());
    }

    #[test]
    fn test_cleared_after_raised() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        assert_eq!(sm.observe(closed(t0, 2.0)).unwrap().kind, AlertKind::Raised);

        let event = sm.observe(OpennessSample::new(0.4, at(t0, 2.1), true)).unwrap();
        assert_eq!(event.kind, AlertKind::Cleared);
        assert_eq!(sm.state(), AlertState::Open);

        assert!(sm.observe(OpennessSample::new(0.4, at(t0, 2.2), true)).is_none());
    }

    #[test]
    fn test_face_loss_cancels_timer() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        sm.observe(closed(t0, 1.9));

        assert!(sm.observe(OpennessSample::absent(at(t0, 2.0))).is_none());
        assert_eq!(sm.state(), AlertState::Open);

        // Timer restarts from scratch
        assert!(sm.observe(closed(t0, 2.1)).is_none());
        assert!(sm.observe(closed(t0, 4.0)).is_none());
        assert_eq!(sm.state(), AlertState::Closing);
        assert!(sm.observe(closed(t0, 4.2)).is_some());
    }

    #[test]
    fn test_face_loss_clears_alert() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        sm.observe(closed(t0, 2.0));

        let event = sm.observe(OpennessSample::absent(at(t0, 2.5))).unwrap();
        assert_eq!(event.kind, AlertKind::Cleared);
    }

    #[test]
    fn test_threshold_is_inclusive_open() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        sm.observe(OpennessSample::new(0.25, at(t0, 0.1), true));
        assert_eq!(sm.state(), AlertState::Open);
    }

    #[test]
    fn test_reconfigure_keeps_running_timer() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        sm.observe(closed(t0, 1.0));

        sm.set_config(StateMachineConfig::new(0.25, Duration::from_secs(1)));
        assert_eq!(sm.closed_since(), Some(t0));
        assert_eq!(sm.state(), AlertState::Closing);

        let event = sm.observe(closed(t0, 1.2)).unwrap();
        assert_eq!(event.kind, AlertKind::Raised);
    }

    #[test]
    fn test_zero_duration_alerts_on_second_closed_sample() {
        let config = StateMachineConfig::new(0.25, Duration::ZERO);
        let mut sm = DrowsinessStateMachine::new(config);
        let t0 = Instant::now();

        assert!(sm.observe(closed(t0, 0.0)).is_none());
        assert_eq!(sm.state(), AlertState::Closing);
        assert!(sm.observe(closed(t0, 0.0)).is_some());
    }

    #[test]
    fn test_reset_returns_to_open_silently() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.0));
        sm.observe(closed(t0, 2.0));

        sm.reset();
        assert_eq!(sm.state(), AlertState::Open);
        assert_eq!(sm.closed_for(at(t0, 3.0)), Duration::ZERO);
        assert!(sm.observe(OpennessSample::new(0.9, at(t0, 3.0), true)).is_none());
    }

    #[test]
    fn test_closed_for() {
        let (mut sm, t0) = machine();
        sm.observe(closed(t0, 0.5));
        assert_eq!(sm.closed_for(at(t0, 1.75)), Duration::from_millis(1250));
    }

    #[test]
    fn test_alert_in_counts_down_while_closing() {
        let (mut sm, t0) = machine();
        assert_eq!(sm.alert_in(t0), None);

        sm.observe(closed(t0, 0.0));
        sm.observe(closed(t0, 1.5));
        assert_eq!(sm.alert_in(at(t0, 1.5)), Some(Duration::from_millis(500)));

        sm.observe(closed(t0, 2.0));
        assert_eq!(sm.state(), AlertState::Alerting);
        assert_eq!(sm.alert_in(at(t0, 2.0)), None);
    }

    #[derive(Debug, Clone)]
    struct Step {
        dt_ms: u64,
        value: f32,
        face_present: bool,
    }

    fn step() -> impl Strategy<Value = Step> {
        (0u64..700, 0.0f32..0.5, proptest::bool::weighted(0.9)).prop_map(
            |(dt_ms, value, face_present)| Step {
                dt_ms,
                value,
                face_present,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_transitions_are_consistent(steps in proptest::collection::vec(step(), 1..200)) {
            let (mut sm, t0) = machine();
            let threshold = sm.config().ear_threshold;
            let sustained = sm.config().sustained_duration;
            let mut now = t0;
            let mut alerting = false;

            for step in steps {
                now += Duration::from_millis(step.dt_ms);
                let sample = OpennessSample::new(step.value, now, step.face_present);
                let event = sm.observe(sample);

                if !step.face_present || step.value >= threshold {
                    prop_assert_eq!(sm.state(), AlertState::Open);
                    prop_assert!(sm.closed_since().is_none());
                    match event {
                        Some(e) => {
                            prop_assert!(alerting);
                            prop_assert_eq!(e.kind, AlertKind::Cleared);
                        }
                        None => prop_assert!(!alerting),
                    }
                    alerting = false;
                } else {
                    let closed_for = sm.closed_for(now);
                    match event {
                        Some(e) => {
                            prop_assert!(!alerting, "raised twice without a clear");
                            prop_assert_eq!(e.kind, AlertKind::Raised);
                            prop_assert!(closed_for >= sustained);
                            alerting = true;
                        }
                        None if closed_for < sustained => {
                            prop_assert_eq!(sm.state(), AlertState::Closing);
                        }
                        None => prop_assert!(alerting),
                    }
                }
            }
        }
    }
}
