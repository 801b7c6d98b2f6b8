//! Connection lifecycle behavior against scripted hardware.

use std::sync::Arc;

use astrogate::backend::mock::{MockChannel, MockFactory};
use astrogate::backend::{BackendFlavor, DeviceKind};
use astrogate::config::{AddressOverrides, Settings};
use astrogate::context::AppContext;
use astrogate::envelope::Status;
use astrogate::error::GateError;
use astrogate::session::{DeviceSnapshot, Session};

fn harness(channel: Arc<MockChannel>) -> (Arc<AppContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.config_dir = dir.path().join("config");
    settings.storage.image_dir = dir.path().join("images");
    let factory = MockFactory::new();
    factory.register(channel);
    (AppContext::new(settings, Arc::new(factory)), dir)
}

fn connect_defaults() -> AddressOverrides {
    AddressOverrides::default()
}

#[tokio::test]
async fn operations_while_disconnected_touch_no_hardware() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    assert!(matches!(
        session.polling().await,
        Err(GateError::NotConnected)
    ));
    assert!(matches!(
        session.reconnect().await,
        Err(GateError::NotConnected)
    ));
    assert!(matches!(
        session.save_configuration().await,
        Err(GateError::NotConnected)
    ));
    assert!(cam.calls().is_empty());
}

#[tokio::test]
async fn connect_probes_capabilities_once() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    let reply = session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    assert_eq!(reply.status, Status::Success);
    let info = &reply.params["info"];
    assert_eq!(info["capabilities"]["can_gain"], true);
    assert_eq!(info["capabilities"]["can_cool"], true);
    assert_eq!(info["numbers"]["min_exposure"], 0.001);
    assert_eq!(info["address"]["port"], 11111);
    assert_eq!(cam.call_count("open"), 1);

    // Second connect is a warning and never reopens the handle.
    let again = session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    assert_eq!(again.status, Status::Warning);
    assert_eq!(cam.call_count("open"), 1);
}

#[tokio::test]
async fn absent_properties_clear_capability_flags() {
    let cam = Arc::new(MockChannel::bare_camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    let reply = session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.params["info"]["capabilities"]["can_gain"], false);
    assert_eq!(reply.params["info"]["capabilities"]["can_cool"], false);
}

#[tokio::test]
async fn push_connect_requires_a_device_name() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    assert!(matches!(
        session.connect(BackendFlavor::Push, &connect_defaults()).await,
        Err(GateError::InvalidValue(_))
    ));
    assert!(!session.is_connected());
    assert!(cam.calls().is_empty());

    let named = AddressOverrides {
        device_name: Some("Mock CCD".to_string()),
        ..Default::default()
    };
    let reply = session.connect(BackendFlavor::Push, &named).await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.params["info"]["address"]["device_name"], "Mock CCD");
}

#[tokio::test]
async fn connect_failure_leaves_session_disconnected() {
    let cam = Arc::new(MockChannel::camera());
    cam.fail_connect(GateError::Network("connection refused".to_string()));
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    assert!(matches!(
        session.connect(BackendFlavor::Poll, &connect_defaults()).await,
        Err(GateError::Network(_))
    ));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn disconnect_releases_and_warns_when_repeated() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    let reply = session.disconnect().await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(cam.call_count("close"), 1);
    assert!(!session.is_connected());

    let again = session.disconnect().await.unwrap();
    assert_eq!(again.status, Status::Warning);
    assert_eq!(cam.call_count("close"), 1);
}

#[tokio::test]
async fn reconnect_cycles_the_handle() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    let reply = session.reconnect().await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert!(session.is_connected());
    assert_eq!(cam.call_count("close"), 1);
    assert_eq!(cam.call_count("open"), 2);
}

#[tokio::test]
async fn scanning_requires_disconnected() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    let reply = session
        .scanning(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.params["devices"].as_array().unwrap().len(), 1);

    session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    let blocked = session
        .scanning(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    assert_eq!(blocked.status, Status::Warning);
}

#[tokio::test]
async fn polling_refreshes_cheap_fields_only() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    let probes_before = cam.call_count("has_property");
    let reply = session.polling().await.unwrap();
    assert_eq!(reply.status, Status::Success);
    assert_eq!(reply.params["info"]["numbers"]["temperature"], -10.0);
    // No capability re-probe on polling.
    assert_eq!(cam.call_count("has_property"), probes_before);
}

#[tokio::test]
async fn configuration_round_trips() {
    let cam = Arc::new(MockChannel::camera());
    let (ctx, _dir) = harness(Arc::clone(&cam));
    let session = Session::new(DeviceKind::Camera, ctx);

    session
        .connect(BackendFlavor::Poll, &connect_defaults())
        .await
        .unwrap();
    let before = session.snapshot().unwrap();

    let saved = session.save_configuration().await.unwrap();
    assert_eq!(saved.status, Status::Success);

    let loaded = session.load_configuration().await.unwrap();
    assert_eq!(loaded.status, Status::Success);
    let restored: DeviceSnapshot =
        serde_json::from_value(loaded.params["info"].clone()).unwrap();
    assert_eq!(restored, before);
}
