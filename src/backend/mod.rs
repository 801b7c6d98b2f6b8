//! Device backend abstraction.
//!
//! Two incompatible remote protocols drive the instruments: a pull/poll
//! style one (the client reads and writes named properties over a host:port
//! session and must re-query for changes) and a push/event style one (a
//! device server asynchronously announces property and blob updates). Both
//! are hidden behind [`DeviceChannel`] so the session layer and the exposure
//! state machine are written once.
//!
//! The key shared primitive is [`DeviceChannel::wait_until`]: the poll
//! adapter implements it as a sleep-loop over property reads, the push
//! adapter as an event wait fed by the update callback. Camera-specific
//! verbs default to "not supported" so non-camera channels implement only
//! the property surface.

pub mod bridge;
pub mod mock;
pub mod poll;
pub mod push;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// The four device kinds this gateway orchestrates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Camera,
    Telescope,
    Focuser,
    FilterWheel,
}

impl DeviceKind {
    pub fn parse(name: &str) -> GateResult<Self> {
        match name {
            "camera" => Ok(DeviceKind::Camera),
            "telescope" => Ok(DeviceKind::Telescope),
            "focuser" => Ok(DeviceKind::Focuser),
            "filterwheel" => Ok(DeviceKind::FilterWheel),
            other => Err(GateError::UnknownDeviceKind(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Telescope => "telescope",
            DeviceKind::Focuser => "focuser",
            DeviceKind::FilterWheel => "filterwheel",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which protocol family a channel speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFlavor {
    Poll,
    Push,
}

/// Addressing for one backend connection.
///
/// The poll protocol addresses devices by number on a host:port endpoint;
/// the push protocol addresses them by name on a shared server connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub flavor: BackendFlavor,
    pub host: String,
    pub port: u16,
    /// Poll protocol device index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_number: Option<u32>,
    /// Push protocol device name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// A device found by discovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub driver: String,
    pub kind: DeviceKind,
}

/// Conditions the exposure machine and motion operations can wait for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// A finished exposure frame is available for download.
    ImageReady,
    /// Motion (slew, focus move, wheel rotation) has settled.
    Settled,
}

/// Outcome of a bounded wait. Transport failures surface as `Err`.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
    /// The hardware entered an error state while waiting.
    Faulted(String),
}

/// Element layout of a downloaded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    U16,
    I32,
    F64,
}

/// Pixel payload in its native element type.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    U16(Vec<u16>),
    I32(Vec<i32>),
    F64(Vec<f64>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U16(v) => v.len(),
            PixelData::I32(v) => v.len(),
            PixelData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes for transport encoding and persistence.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            PixelData::U16(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            PixelData::I32(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            PixelData::F64(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
        }
    }
}

/// One downloaded exposure frame with its element layout metadata.
///
/// Not every backend reports bit depth directly; the session derives it from
/// `max_adu` and the element kind.
#[derive(Clone, Debug)]
pub struct FrameBlob {
    pub width: u32,
    pub height: u32,
    pub element: ElementKind,
    pub max_adu: u64,
    pub data: PixelData,
}

/// Uniform contract over both protocol families.
///
/// Mirrors the capability-trait approach used for instruments: small async
/// methods, `Send + Sync`, interior mutability behind `&self`, default
/// bodies for verbs a device kind does not carry.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Establish the backend connection for this device.
    async fn open(&self) -> GateResult<()>;

    /// Release the backend connection. Must be safe to call repeatedly.
    async fn close(&self) -> GateResult<()>;

    /// Probe for the presence of a named optional property.
    ///
    /// Absence is `Ok(false)`, never a failure: a missing vector only clears
    /// the corresponding capability flag.
    async fn has_property(&self, name: &str) -> GateResult<bool>;

    async fn read_number(&self, name: &str) -> GateResult<f64>;
    async fn write_number(&self, name: &str, value: f64) -> GateResult<()>;
    async fn read_switch(&self, name: &str) -> GateResult<bool>;
    async fn write_switch(&self, name: &str, on: bool) -> GateResult<()>;
    async fn read_text(&self, name: &str) -> GateResult<String>;

    /// List devices discoverable through this backend.
    async fn discover(&self) -> GateResult<Vec<DiscoveredDevice>>;

    /// Block until `signal` is observed or `timeout` elapses.
    async fn wait_until(&self, signal: Signal, timeout: Duration) -> GateResult<WaitOutcome>;

    /// Start a hardware exposure. Camera channels only.
    async fn begin_exposure(&self, _seconds: f64, _dark: bool) -> GateResult<()> {
        Err(GateError::NotSupported("exposure control".to_string()))
    }

    /// Stop an in-flight exposure. Camera channels only.
    async fn halt_exposure(&self) -> GateResult<()> {
        Err(GateError::NotSupported("exposure abort".to_string()))
    }

    /// Download the finished frame. Camera channels only.
    async fn read_frame(&self) -> GateResult<FrameBlob> {
        Err(GateError::NotSupported("frame download".to_string()))
    }
}

/// Builds channels from connect-time addresses.
///
/// Injected through the application context so sessions never reach for
/// globals and tests can substitute scripted hardware.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open_channel(
        &self,
        kind: DeviceKind,
        address: &Address,
    ) -> GateResult<Arc<dyn DeviceChannel>>;
}
