//! HTTP and websocket surface.
//!
//! `/device` upgrades to the command websocket: one dispatcher per
//! connection, inbound requests processed strictly in arrival order, with
//! unsolicited exposure-completion signals multiplexed onto the same socket.
//! Two plain HTTP side endpoints list declared devices and acknowledge
//! driver start/stop requests.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::dispatch::{CommandMessage, Dispatcher};
use crate::envelope::{Envelope, Outbound};
use crate::error::GateResult;

/// Buffer for unsolicited signal frames per connection.
const SIGNAL_QUEUE: usize = 32;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/device", get(device_upgrade))
        .route("/api/devices", get(list_devices))
        .route("/api/driver/:action/:kind/:name", get(driver_action))
        .with_state(ctx)
}

/// Bind and serve until the process is stopped.
pub async fn serve(ctx: Arc<AppContext>) -> GateResult<()> {
    let listen = ctx.settings.server.listen.clone();
    let listener = TcpListener::bind(&listen).await?;
    info!(%listen, "listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

async fn device_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    ws.on_upgrade(move |socket| connection_loop(socket, ctx))
}

/// Per-connection command loop.
///
/// Requests are handled one at a time in arrival order; exposure monitors
/// spawned by the dispatcher deliver their completion envelopes through the
/// signal channel and are interleaved between replies.
async fn connection_loop(socket: WebSocket, ctx: Arc<AppContext>) {
    let (signal_tx, mut signal_rx) = mpsc::channel::<Outbound>(SIGNAL_QUEUE);
    let dispatcher = Dispatcher::new(&ctx, signal_tx);
    let (mut sink, mut stream) = socket.split();
    info!("client connected");

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                let Message::Text(text) = message else { continue };
                let outbound = match serde_json::from_str::<CommandMessage>(&text) {
                    Ok(command) => dispatcher.dispatch(command).await,
                    Err(err) => Outbound::reply(Envelope::error(format!(
                        "malformed request: {err}"
                    ))),
                };
                if send_frame(&mut sink, &outbound).await.is_err() {
                    break;
                }
            }
            Some(signal) = signal_rx.recv() => {
                if send_frame(&mut sink, &signal).await.is_err() {
                    break;
                }
            }
        }
    }

    // Sessions never outlive their connection.
    dispatcher.sessions().teardown().await;
    info!("client disconnected");
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &Outbound,
) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "reply serialization failed");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|err| {
        debug!(error = %err, "socket closed mid-send");
    })
}

/// All declared devices as `{name, driver, kind}` records.
async fn list_devices(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let devices: Vec<_> = ctx
        .settings
        .drivers
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "driver": d.name,
                "kind": d.kind,
            })
        })
        .collect();
    Json(json!(devices))
}

/// Plaintext driver start/stop acknowledgement.
async fn driver_action(
    Path((action, kind, name)): Path<(String, String, String)>,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    if action != "start" && action != "stop" {
        return (StatusCode::BAD_REQUEST, format!("unknown action '{action}'"))
            .into_response();
    }
    let declared = ctx
        .settings
        .drivers
        .iter()
        .any(|d| d.name == name && d.kind.label() == kind);
    if !declared {
        return (
            StatusCode::NOT_FOUND,
            format!("no declared {kind} driver named '{name}'"),
        )
            .into_response();
    }
    info!(%action, %kind, %name, "driver control");
    (StatusCode::OK, format!("driver '{name}' {action}ed")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFactory;
    use crate::config::{DriverEntry, Settings};
    use crate::backend::{BackendFlavor, DeviceKind};

    fn test_ctx() -> Arc<AppContext> {
        let mut settings = Settings::default();
        settings.drivers.push(DriverEntry {
            name: "ccd_simulator".to_string(),
            kind: DeviceKind::Camera,
            flavor: BackendFlavor::Push,
        });
        AppContext::new(settings, Arc::new(MockFactory::simulated()))
    }

    #[tokio::test]
    async fn lists_declared_devices() {
        let Json(value) = list_devices(State(test_ctx())).await;
        let devices = value.as_array().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["name"], "ccd_simulator");
        assert_eq!(devices[0]["kind"], "camera");
    }

    #[tokio::test]
    async fn driver_action_rejects_unknown_names() {
        let response = driver_action(
            Path((
                "start".to_string(),
                "camera".to_string(),
                "nonexistent".to_string(),
            )),
            State(test_ctx()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = driver_action(
            Path((
                "start".to_string(),
                "camera".to_string(),
                "ccd_simulator".to_string(),
            )),
            State(test_ctx()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
