//! Dispatcher boundary: routing, error folding, signal scheduling.

use std::sync::Arc;
use std::time::Duration;

use astrogate::backend::mock::{ExposureScript, MockChannel, MockFactory};
use astrogate::config::Settings;
use astrogate::context::AppContext;
use astrogate::dispatch::{CommandMessage, Dispatcher};
use astrogate::envelope::{Outbound, OutboundKind, Status};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Harness {
    dispatcher: Dispatcher,
    signals: mpsc::Receiver<Outbound>,
    camera: Arc<MockChannel>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.config_dir = dir.path().join("config");
    settings.storage.image_dir = dir.path().join("images");
    settings.exposure.margin = Duration::from_secs(5);

    let camera = Arc::new(MockChannel::camera());
    let factory = MockFactory::new();
    factory.register(Arc::clone(&camera));
    factory.register(Arc::new(MockChannel::telescope()));
    factory.register(Arc::new(MockChannel::focuser()));
    factory.register(Arc::new(MockChannel::filterwheel()));

    let ctx = AppContext::new(settings, Arc::new(factory));
    let (signal_tx, signals) = mpsc::channel(8);
    Harness {
        dispatcher: Dispatcher::new(&ctx, signal_tx),
        signals,
        camera,
        _dir: dir,
    }
}

fn command(device: &str, event: &str, params: Value) -> CommandMessage {
    let params: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
    CommandMessage {
        device: device.to_string(),
        event: event.to_string(),
        params,
    }
}

#[tokio::test]
async fn unknown_device_kind_folds_to_error() {
    let h = harness();
    let reply = h.dispatcher.dispatch(command("guider", "connect", json!({}))).await;
    assert_eq!(reply.kind, OutboundKind::Reply);
    assert_eq!(reply.envelope.status, Status::Error);
    assert!(reply.envelope.message.contains("unknown device type"));
}

#[tokio::test]
async fn unknown_operation_folds_to_error() {
    let h = harness();
    let reply = h
        .dispatcher
        .dispatch(command("camera", "levitate", json!({})))
        .await;
    assert_eq!(reply.envelope.status, Status::Error);
    assert!(reply.envelope.message.contains("command not available"));
}

#[tokio::test]
async fn lifecycle_routes_to_every_kind() {
    let h = harness();
    for device in ["camera", "telescope", "focuser", "filterwheel"] {
        let reply = h
            .dispatcher
            .dispatch(command(device, "connect", json!({})))
            .await;
        assert_eq!(reply.envelope.status, Status::Success, "{device}");
        let reply = h
            .dispatcher
            .dispatch(command(device, "polling", json!({})))
            .await;
        assert_eq!(reply.envelope.status, Status::Success, "{device}");
    }
}

#[tokio::test]
async fn exposure_completion_arrives_as_signal() {
    let mut h = harness();
    h.camera
        .script(ExposureScript::ReadyAfter(Duration::from_millis(20)));
    h.dispatcher
        .dispatch(command("camera", "connect", json!({})))
        .await;

    let reply = h
        .dispatcher
        .dispatch(command(
            "camera",
            "start_exposure",
            json!({"exposure": 0.05, "gain": 30.0, "offset": 10.0, "binning": 1.0}),
        ))
        .await;
    assert_eq!(reply.envelope.status, Status::Success);

    let signal = timeout(Duration::from_secs(2), h.signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.kind, OutboundKind::Signal);
    assert_eq!(signal.envelope.status, Status::Success);
    assert!(signal.envelope.message.contains("finished"));

    let result = h
        .dispatcher
        .dispatch(command("camera", "get_exposure_result", json!({})))
        .await;
    assert_eq!(result.envelope.status, Status::Success);
}

#[tokio::test]
async fn validation_failures_never_escape_the_boundary() {
    let h = harness();
    h.dispatcher
        .dispatch(command("camera", "connect", json!({})))
        .await;
    let reply = h
        .dispatcher
        .dispatch(command("camera", "start_exposure", json!({"exposure": -1.0})))
        .await;
    assert_eq!(reply.envelope.status, Status::Error);
    assert!(reply.envelope.params["error"].as_str().is_some());

    // Malformed parameter types fold the same way.
    let reply = h
        .dispatcher
        .dispatch(command("camera", "start_exposure", json!({"exposure": "long"})))
        .await;
    assert_eq!(reply.envelope.status, Status::Error);
}

#[tokio::test]
async fn kind_specific_operations_route() {
    let h = harness();
    h.dispatcher
        .dispatch(command("filterwheel", "connect", json!({})))
        .await;
    let reply = h
        .dispatcher
        .dispatch(command("filterwheel", "set_filter", json!({"filter": 2})))
        .await;
    assert_eq!(reply.envelope.status, Status::Success);
    assert_eq!(reply.envelope.params["name"], "R");

    let list = h
        .dispatcher
        .dispatch(command("filterwheel", "get_filters_list", json!({})))
        .await;
    assert_eq!(
        list.envelope.params["filters"],
        json!(["L", "R", "G", "B", "Ha"])
    );

    h.dispatcher
        .dispatch(command("focuser", "connect", json!({})))
        .await;
    let reply = h
        .dispatcher
        .dispatch(command("focuser", "move_to", json!({"position": 7000.0})))
        .await;
    assert_eq!(reply.envelope.status, Status::Success);

    h.dispatcher
        .dispatch(command("telescope", "connect", json!({})))
        .await;
    // The mock mount starts parked; a slew is a state violation.
    let parked = h
        .dispatcher
        .dispatch(command("telescope", "goto", json!({"ra": 5.5, "dec": 30.0})))
        .await;
    assert_eq!(parked.envelope.status, Status::Warning);
    h.dispatcher
        .dispatch(command("telescope", "unpark", json!({})))
        .await;
    let reply = h
        .dispatcher
        .dispatch(command("telescope", "goto", json!({"ra": 5.5, "dec": 30.0})))
        .await;
    assert_eq!(reply.envelope.status, Status::Success);
}

#[tokio::test]
async fn teardown_releases_all_sessions() {
    let h = harness();
    h.dispatcher
        .dispatch(command("camera", "connect", json!({})))
        .await;
    assert!(h.dispatcher.sessions().camera.base().is_connected());
    h.dispatcher.sessions().teardown().await;
    assert!(!h.dispatcher.sessions().camera.base().is_connected());
    assert_eq!(h.camera.call_count("close"), 1);
}
