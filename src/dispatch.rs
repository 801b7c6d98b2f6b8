//! Command dispatch.
//!
//! One [`Dispatcher`] per client connection routes `{device, event, params}`
//! requests to the matching session operation through a closed
//! (kind, operation) match. Nothing escapes this boundary as a raw error:
//! every failure folds into a reply envelope. Camera exposure starts
//! additionally schedule a fire-and-forget notifier that forwards the
//! completion envelope to the connection's signal channel.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{BackendFlavor, DeviceKind};
use crate::config::AddressOverrides;
use crate::context::AppContext;
use crate::envelope::{Envelope, Outbound};
use crate::error::{GateError, GateResult};
use crate::session::camera::{CameraSession, ExposureSpec, SequencePlan};
use crate::session::filterwheel::FilterWheelSession;
use crate::session::focuser::FocuserSession;
use crate::session::telescope::{GotoSpec, TelescopeSession};
use crate::session::Session;

/// One client request.
#[derive(Clone, Debug, Deserialize)]
pub struct CommandMessage {
    pub device: String,
    pub event: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Connect/scanning parameters: backend choice plus address overrides.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default = "default_flavor")]
    flavor: BackendFlavor,
    #[serde(flatten)]
    overrides: AddressOverrides,
}

fn default_flavor() -> BackendFlavor {
    BackendFlavor::Poll
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    on: bool,
}

#[derive(Debug, Deserialize)]
struct MoveParams {
    position: f64,
}

#[derive(Debug, Deserialize)]
struct StepParams {
    steps: f64,
}

#[derive(Debug, Deserialize)]
struct FilterParams {
    filter: u32,
}

fn parse<T: DeserializeOwned>(params: &Map<String, Value>) -> GateResult<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| GateError::InvalidValue(format!("bad parameters: {e}")))
}

/// The four sessions owned by one client connection.
pub struct SessionSet {
    pub camera: Arc<CameraSession>,
    pub telescope: TelescopeSession,
    pub focuser: FocuserSession,
    pub filterwheel: FilterWheelSession,
}

impl SessionSet {
    pub fn new(ctx: &Arc<AppContext>) -> Self {
        Self {
            camera: CameraSession::new(Session::new(DeviceKind::Camera, Arc::clone(ctx))),
            telescope: TelescopeSession::new(Session::new(
                DeviceKind::Telescope,
                Arc::clone(ctx),
            )),
            focuser: FocuserSession::new(Session::new(DeviceKind::Focuser, Arc::clone(ctx))),
            filterwheel: FilterWheelSession::new(Session::new(
                DeviceKind::FilterWheel,
                Arc::clone(ctx),
            )),
        }
    }

    fn base(&self, kind: DeviceKind) -> &Session {
        match kind {
            DeviceKind::Camera => self.camera.base(),
            DeviceKind::Telescope => self.telescope.base(),
            DeviceKind::Focuser => self.focuser.base(),
            DeviceKind::FilterWheel => self.filterwheel.base(),
        }
    }

    /// Release every connected device. Called on connection teardown.
    pub async fn teardown(&self) {
        let _ = self.camera.disconnect().await;
        for kind in [
            DeviceKind::Telescope,
            DeviceKind::Focuser,
            DeviceKind::FilterWheel,
        ] {
            let _ = self.base(kind).disconnect().await;
        }
    }
}

pub struct Dispatcher {
    sessions: SessionSet,
    signal_tx: mpsc::Sender<Outbound>,
}

impl Dispatcher {
    pub fn new(ctx: &Arc<AppContext>, signal_tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            sessions: SessionSet::new(ctx),
            signal_tx,
        }
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.sessions
    }

    /// Route one request and fold any failure into the reply.
    pub async fn dispatch(&self, message: CommandMessage) -> Outbound {
        debug!(device = %message.device, event = %message.event, "dispatch");
        let envelope = match self.route(&message).await {
            Ok(envelope) => envelope,
            Err(err) => Envelope::from(err),
        };
        Outbound::reply(envelope)
    }

    async fn route(&self, message: &CommandMessage) -> GateResult<Envelope> {
        let kind = DeviceKind::parse(&message.device)?;
        let params = &message.params;

        // Lifecycle operations shared by every kind. The camera overrides
        // disconnect so an in-flight exposure is stopped first.
        match message.event.as_str() {
            "connect" => {
                let p: ConnectParams = parse(params)?;
                return self.sessions.base(kind).connect(p.flavor, &p.overrides).await;
            }
            "disconnect" => {
                return match kind {
                    DeviceKind::Camera => self.sessions.camera.disconnect().await,
                    _ => self.sessions.base(kind).disconnect().await,
                };
            }
            "reconnect" => return self.sessions.base(kind).reconnect().await,
            "scanning" => {
                let p: ConnectParams = parse(params)?;
                return self.sessions.base(kind).scanning(p.flavor, &p.overrides).await;
            }
            "polling" => return self.sessions.base(kind).polling().await,
            "save_configuration" => {
                return self.sessions.base(kind).save_configuration().await
            }
            "load_configuration" => {
                return self.sessions.base(kind).load_configuration().await
            }
            _ => {}
        }

        match (kind, message.event.as_str()) {
            (DeviceKind::Camera, "start_exposure") => {
                let spec: ExposureSpec = parse(params)?;
                let (reply, done) = self.sessions.camera.start_exposure(spec).await?;
                let tx = self.signal_tx.clone();
                tokio::spawn(async move {
                    if let Ok(envelope) = done.await {
                        let _ = tx.send(Outbound::signal(envelope)).await;
                    }
                });
                Ok(reply)
            }
            (DeviceKind::Camera, "abort_exposure") => {
                self.sessions.camera.abort_exposure().await
            }
            (DeviceKind::Camera, "get_exposure_result") => {
                self.sessions.camera.get_exposure_result().await
            }
            (DeviceKind::Camera, "get_exposure_status") => {
                self.sessions.camera.get_exposure_status().await
            }
            (DeviceKind::Camera, "start_sequence_exposure") => {
                let plan: SequencePlan = parse(params)?;
                self.sessions.camera.start_sequence_exposure(plan).await
            }
            (DeviceKind::Camera, "pause_sequence_exposure") => {
                self.sessions.camera.pause_sequence_exposure().await
            }
            (DeviceKind::Camera, "continue_sequence_exposure") => {
                self.sessions.camera.continue_sequence_exposure().await
            }
            (DeviceKind::Camera, "abort_sequence_exposure") => {
                self.sessions.camera.abort_sequence_exposure().await
            }
            (DeviceKind::Camera, "get_sequence_status") => {
                self.sessions.camera.get_sequence_status().await
            }
            (DeviceKind::Camera, "start_cooling") => {
                self.sessions.camera.start_cooling(true).await
            }
            (DeviceKind::Camera, "stop_cooling") => {
                self.sessions.camera.start_cooling(false).await
            }
            (DeviceKind::Camera, "get_cooling_status") => {
                self.sessions.camera.get_cooling_status().await
            }

            (DeviceKind::Telescope, "goto") => {
                let spec: GotoSpec = parse(params)?;
                self.sessions.telescope.goto(spec).await
            }
            (DeviceKind::Telescope, "abort_goto") => self.sessions.telescope.abort_goto().await,
            (DeviceKind::Telescope, "park") => self.sessions.telescope.park().await,
            (DeviceKind::Telescope, "unpark") => self.sessions.telescope.unpark().await,
            (DeviceKind::Telescope, "set_tracking") => {
                let p: SwitchParams = parse(params)?;
                self.sessions.telescope.set_tracking(p.on).await
            }
            (DeviceKind::Telescope, "get_position") => {
                self.sessions.telescope.get_position().await
            }

            (DeviceKind::Focuser, "move_to") => {
                let p: MoveParams = parse(params)?;
                self.sessions.focuser.move_to(p.position).await
            }
            (DeviceKind::Focuser, "move_relative") => {
                let p: StepParams = parse(params)?;
                self.sessions.focuser.move_relative(p.steps).await
            }
            (DeviceKind::Focuser, "abort_move") => self.sessions.focuser.abort_move().await,
            (DeviceKind::Focuser, "get_temperature") => {
                self.sessions.focuser.get_temperature().await
            }

            (DeviceKind::FilterWheel, "set_filter") => {
                let p: FilterParams = parse(params)?;
                self.sessions.filterwheel.set_filter(p.filter).await
            }
            (DeviceKind::FilterWheel, "get_filter") => {
                self.sessions.filterwheel.get_filter().await
            }
            (DeviceKind::FilterWheel, "get_filters_list") => {
                self.sessions.filterwheel.get_filters_list().await
            }

            (_, operation) => Err(GateError::UnknownOperation(operation.to_string())),
        }
    }
}
