//! Exposure state machine behavior: validation, completion, abort, timeout.

use std::sync::Arc;
use std::time::Duration;

use astrogate::backend::mock::{ExposureScript, MockChannel, MockFactory};
use astrogate::backend::{BackendFlavor, DeviceKind};
use astrogate::config::{AddressOverrides, Settings};
use astrogate::context::AppContext;
use astrogate::envelope::{Envelope, Status};
use astrogate::error::GateError;
use astrogate::session::camera::{CameraSession, ExposurePhase, ExposureSpec};
use astrogate::session::Session;
use tokio::time::timeout;

fn harness(channel: Arc<MockChannel>, margin: Duration) -> (Arc<CameraSession>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.config_dir = dir.path().join("config");
    settings.storage.image_dir = dir.path().join("images");
    settings.exposure.margin = margin;
    let factory = MockFactory::new();
    factory.register(channel);
    let ctx = AppContext::new(settings, Arc::new(factory));
    let camera = CameraSession::new(Session::new(DeviceKind::Camera, ctx));
    (camera, dir)
}

async fn connect(camera: &Arc<CameraSession>) {
    camera
        .base()
        .connect(BackendFlavor::Poll, &AddressOverrides::default())
        .await
        .unwrap();
}

fn spec(exposure: f64) -> ExposureSpec {
    ExposureSpec {
        exposure,
        gain: Some(30.0),
        offset: Some(10.0),
        binning: Some(1.0),
        dark: false,
    }
}

#[tokio::test]
async fn negative_exposure_rejected_without_hardware_call() {
    let cam = Arc::new(MockChannel::camera());
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    assert!(matches!(
        camera.start_exposure(spec(-1.0)).await,
        Err(GateError::InvalidValue(_))
    ));
    assert_eq!(camera.phase(), ExposurePhase::Idle);
    assert_eq!(cam.call_count("begin_exposure"), 0);
}

#[tokio::test]
async fn exposure_runs_idle_exposing_ready_idle() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::ReadyAfter(Duration::from_millis(30)));
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    let (reply, done) = camera.start_exposure(spec(0.5)).await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(camera.phase(), ExposurePhase::Exposing);

    let completion = timeout(Duration::from_secs(2), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Success);
    assert_eq!(camera.phase(), ExposurePhase::Ready);

    let result = camera.get_exposure_result().await.unwrap();
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.params["metadata"]["width"], 64);
    assert_eq!(result.params["metadata"]["depth"], 16);
    assert_eq!(result.params["metadata"]["gain"], 30.0);
    assert!(result.params["data"].as_str().is_some());
    assert_eq!(
        result.params["histogram"].as_array().unwrap().len(),
        256
    );
    assert_eq!(camera.phase(), ExposurePhase::Idle);
}

#[tokio::test]
async fn second_start_rejected_while_exposing() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::ReadyAfter(Duration::from_millis(300)));
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    let (_, _done) = camera.start_exposure(spec(0.5)).await.unwrap();
    assert!(matches!(
        camera.start_exposure(spec(0.5)).await,
        Err(GateError::InvalidOperation(_))
    ));
    assert_eq!(cam.call_count("begin_exposure"), 1);
}

#[tokio::test]
async fn missing_parameters_get_defaults_with_warning() {
    let cam = Arc::new(MockChannel::camera());
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    let (reply, done) = camera
        .start_exposure(ExposureSpec {
            exposure: 0.05,
            gain: None,
            offset: None,
            binning: None,
            dark: false,
        })
        .await
        .unwrap();
    assert_eq!(reply.status, Status::Warning);
    let warnings = reply.params["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 3);
    assert!(warnings[0].as_str().unwrap().contains("gain"));
    assert_eq!(cam.call_count("write_number"), 3);
    let _ = timeout(Duration::from_secs(2), done).await;
}

#[tokio::test]
async fn abort_while_idle_is_warning_without_stop_call() {
    let cam = Arc::new(MockChannel::camera());
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    let reply = camera.abort_exposure().await.unwrap();
    assert_eq!(reply.status, Status::Warning);
    assert_eq!(cam.call_count("halt_exposure"), 0);
}

#[tokio::test]
async fn abort_wakes_the_monitor_immediately() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::NeverReady);
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(60));
    connect(&camera).await;

    let (_, done) = camera.start_exposure(spec(1.0)).await.unwrap();
    let reply = camera.abort_exposure().await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(camera.phase(), ExposurePhase::Idle);
    assert_eq!(cam.call_count("halt_exposure"), 1);

    // The waiter resolves now, not after the 61-second budget.
    let completion = timeout(Duration::from_secs(1), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Warning);
}

#[tokio::test]
async fn abort_without_the_capability_is_an_error() {
    let bare = Arc::new(MockChannel::bare_camera());
    bare.script(ExposureScript::NeverReady);
    let (camera, _dir) = harness(Arc::clone(&bare), Duration::from_secs(60));
    connect(&camera).await;

    let (_, _done) = camera.start_exposure(spec(0.5)).await.unwrap();
    let err = camera.abort_exposure().await.unwrap_err();
    assert!(matches!(err, GateError::NotSupported(_)));
    // A missing capability is a hard error, not a retryable warning.
    assert_eq!(Envelope::from(&err).status, Status::Error);
    assert_eq!(bare.call_count("halt_exposure"), 0);
}

#[tokio::test]
async fn abort_without_idle_confirmation_is_an_error() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::NeverReady);
    cam.refuse_abort_confirmation();
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(60));
    connect(&camera).await;

    let (_, _done) = camera.start_exposure(spec(1.0)).await.unwrap();
    assert!(matches!(
        camera.abort_exposure().await,
        Err(GateError::Driver(_))
    ));
}

#[tokio::test]
async fn timeout_leaves_session_restartable() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::NeverReady);
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_millis(50));
    connect(&camera).await;

    let (_, done) = camera.start_exposure(spec(0.01)).await.unwrap();
    let completion = timeout(Duration::from_secs(2), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Error);
    assert!(completion.message.contains("timed out"));
    assert_eq!(camera.phase(), ExposurePhase::Aborted);

    // A new exposure is accepted afterward.
    cam.script(ExposureScript::ReadyAfter(Duration::from_millis(10)));
    let (reply, done) = camera.start_exposure(spec(0.01)).await.unwrap();
    assert_eq!(reply.status, Status::Success);
    let completion = timeout(Duration::from_secs(2), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Success);
}

#[tokio::test]
async fn hardware_fault_surfaces_as_driver_error() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::FaultAfter(
        Duration::from_millis(20),
        "shutter jam".to_string(),
    ));
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    let (_, done) = camera.start_exposure(spec(0.5)).await.unwrap();
    let completion = timeout(Duration::from_secs(2), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Error);
    assert!(completion.message.contains("shutter jam"));
    assert_eq!(camera.phase(), ExposurePhase::Error);
}

#[tokio::test]
async fn result_requires_ready_state() {
    let cam = Arc::new(MockChannel::camera());
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;

    assert!(matches!(
        camera.get_exposure_result().await,
        Err(GateError::InvalidOperation(_))
    ));
    assert_eq!(cam.call_count("read_frame"), 0);
}

#[tokio::test]
async fn disconnect_aborts_inflight_exposure() {
    let cam = Arc::new(MockChannel::camera());
    cam.script(ExposureScript::NeverReady);
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(60));
    connect(&camera).await;

    let (_, done) = camera.start_exposure(spec(1.0)).await.unwrap();
    let reply = camera.disconnect().await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert!(!camera.base().is_connected());
    assert_eq!(cam.call_count("halt_exposure"), 1);

    let completion = timeout(Duration::from_secs(1), done).await.unwrap().unwrap();
    assert_eq!(completion.status, Status::Warning);
}

#[tokio::test]
async fn cooling_requires_the_capability() {
    let bare = Arc::new(MockChannel::bare_camera());
    let (camera, _dir) = harness(Arc::clone(&bare), Duration::from_secs(10));
    connect(&camera).await;
    assert!(matches!(
        camera.start_cooling(true).await,
        Err(GateError::NotSupported(_))
    ));

    let cam = Arc::new(MockChannel::camera());
    let (camera, _dir) = harness(Arc::clone(&cam), Duration::from_secs(10));
    connect(&camera).await;
    let reply = camera.start_cooling(true).await.unwrap();
    assert_eq!(reply.status, Status::Success);
    let status = camera.get_cooling_status().await.unwrap();
    assert_eq!(status.params["cooler"], true);
    assert_eq!(status.params["temperature"], -10.0);
}
