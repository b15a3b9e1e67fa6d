//! BlinkSense API Server
//!
//! HTTP view onto a running detector session: status, telemetry, alert
//! history, runtime settings and Prometheus metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{AnnotatedFrame, DetectorSession};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub mod error;
mod routes;
pub mod settings;

pub use error::{ApiError, ApiResult};
pub use settings::AppConfig;

/// Application state shared across handlers
pub struct AppState {
    pub session: Arc<DetectorSession>,
    /// Latest processed frame, when the session publishes frames
    pub frames: Option<watch::Receiver<Option<Arc<AnnotatedFrame>>>>,
    /// Prometheus renderer, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(session: Arc<DetectorSession>) -> Self {
        Self {
            session,
            frames: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_frames(mut self, frames: watch::Receiver<Option<Arc<AnnotatedFrame>>>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::status::health))
        .route("/api/v1/status", get(routes::status::status))
        .route("/api/v1/telemetry", get(routes::status::telemetry))
        .route("/api/v1/frame/latest", get(routes::status::latest_frame))
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route(
            "/api/v1/settings",
            get(routes::control::get_settings).put(routes::control::put_settings),
        )
        .route("/api/v1/reset", post(routes::control::reset))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(config: &settings::LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config.level.parse()?;
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting::LogSink;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use camera_capture::{ReplaySource, VideoFrame};
    use dms::{DmsError, FaceLandmarks, Perception, Point};
    use pipeline::{DetectorSettings, NullPublisher, SessionParts, WatchPublisher};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const CLOSED: [Point; 6] = [
        Point::new(0.0, 0.0),
        Point::new(0.3, 0.05),
        Point::new(0.7, 0.05),
        Point::new(1.0, 0.0),
        Point::new(0.7, -0.05),
        Point::new(0.3, -0.05),
    ];

    fn closed_eyes() -> Box<dyn Perception> {
        Box::new(|_: &VideoFrame| -> Result<Vec<FaceLandmarks>, DmsError> {
            Ok(vec![FaceLandmarks::new(vec![CLOSED])])
        })
    }

    /// Session that has processed 3 s of closed eyes at 10 fps and finished
    async fn finished_state() -> Arc<AppState> {
        finished_after(31).await
    }

    /// Session that has processed `count` closed-eye frames at 10 fps
    async fn finished_after(count: u64) -> Arc<AppState> {
        let frames = (0..count).map(|i| VideoFrame::metadata_only(i * 100_000_000, i as u32));
        let (publisher, rx) = WatchPublisher::channel();
        let session = DetectorSession::start(
            DetectorSettings::default(),
            SessionParts {
                source: Box::new(ReplaySource::new(frames)),
                perception: closed_eyes(),
                sink: Arc::new(LogSink),
                publisher: Box::new(publisher),
            },
        )
        .unwrap();
        session.join(alerting::ShutdownMode::Drain).await.unwrap();

        Arc::new(AppState::new(Arc::new(session)).with_frames(rx))
    }

    async fn call(
        state: Arc<AppState>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_finished_pipeline() {
        let state = finished_state().await;
        let (status, body) = call(state.clone(), Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");
        assert_eq!(body["session_id"], state.session.id().to_string());
    }

    #[tokio::test]
    async fn test_status_and_telemetry() {
        let state = finished_state().await;

        let (status, body) = call(state.clone(), Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "alerting");
        assert_eq!(body["frames_recorded"], 31);
        assert_eq!(body["alerts_raised"], 1);
        assert_eq!(body["closed_for_secs"], 3.0);
        assert!(body["alert_in_secs"].is_null());
        let average = body["average_openness"].as_f64().unwrap();
        assert!((average - 0.1).abs() < 1e-4);
        assert_eq!(body["dispatch"]["dispatched"], 1);

        let (_, body) = call(state, Method::GET, "/api/v1/telemetry", None).await;
        assert_eq!(body["openness_history"].as_array().unwrap().len(), 31);
        assert_eq!(body["alert_history"][0]["offset_ms"], 2000);
    }

    #[tokio::test]
    async fn test_status_counts_down_while_closing() {
        // 1.4 s of closed eyes under a 2 s sustained duration
        let state = finished_after(15).await;

        let (_, body) = call(state.clone(), Method::GET, "/api/v1/status", None).await;
        assert_eq!(body["state"], "closing");
        assert_eq!(body["alerts_raised"], 0);
        let alert_in = body["alert_in_secs"].as_f64().unwrap();
        assert!((alert_in - 0.6).abs() < 1e-3);

        let (_, body) = call(state, Method::GET, "/api/v1/telemetry", None).await;
        assert_eq!(body["alert_in_ms"], 600);
    }

    #[tokio::test]
    async fn test_alerts_limit_and_latest_frame() {
        let state = finished_state().await;

        let (_, body) = call(state.clone(), Method::GET, "/api/v1/alerts?limit=0", None).await;
        assert_eq!(body["count"], 0);
        assert_eq!(body["total_raised"], 1);

        let (_, body) = call(state.clone(), Method::GET, "/api/v1/alerts", None).await;
        assert_eq!(body["data"][0]["kind"], "raised");

        let (status, body) = call(state, Method::GET, "/api/v1/frame/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sequence"], 30);
        assert_eq!(body["state"], "alerting");
    }

    #[tokio::test]
    async fn test_settings_update_and_validation() {
        let state = finished_state().await;

        let (status, body) = call(
            state.clone(),
            Method::PUT,
            "/api/v1/settings",
            Some(json!({"ear_threshold": 0.2, "sustained_secs": 3.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        assert_eq!(body["settings"]["rearm_secs"], 2.0);

        let (status, body) = call(
            state.clone(),
            Method::PUT,
            "/api/v1/settings",
            Some(json!({"ear_threshold": 2.0})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("ear_threshold"));

        let (_, body) = call(state, Method::GET, "/api/v1/settings", None).await;
        assert_eq!(body["version"], 1);
        assert_eq!(body["settings"]["sustained_secs"], 3.0);
    }

    #[tokio::test]
    async fn test_reset_accepted_and_metrics_absent() {
        let session = DetectorSession::start(
            DetectorSettings::default(),
            SessionParts {
                source: Box::new(ReplaySource::new(Vec::new())),
                perception: closed_eyes(),
                sink: Arc::new(LogSink),
                publisher: Box::new(NullPublisher),
            },
        )
        .unwrap();
        let state = Arc::new(AppState::new(Arc::new(session)));

        let (status, body) = call(state.clone(), Method::POST, "/api/v1/reset", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "reset requested");

        let (status, _) = call(state.clone(), Method::GET, "/api/v1/frame/latest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(state.clone(), Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let join = state.session.join(alerting::ShutdownMode::Stop);
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
