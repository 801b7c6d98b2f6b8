//! Per-device sessions.
//!
//! One [`Session`] per device kind owns the backend channel for that device
//! and tracks the Disconnected/Connected state machine. The lifecycle bodies
//! (connect, disconnect, reconnect, scanning, polling, configuration
//! save/load) are written once here; each kind contributes a static
//! [`DeviceProfile`] naming the optional capabilities to probe and the
//! properties worth snapshotting, plus a thin wrapper with its control
//! operations.
//!
//! Capability flags are probed once at connect time and immutable for the
//! lifetime of the connection.

pub mod camera;
pub mod filterwheel;
pub mod focuser;
pub mod telescope;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{Address, BackendFlavor, DeviceChannel, DeviceKind, Signal, WaitOutcome};
use crate::config::AddressOverrides;
use crate::context::AppContext;
use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};

/// Pause between release and re-establish during `reconnect`.
const RECONNECT_SETTLE: Duration = Duration::from_millis(500);

/// Wait for motion (slew, focus move, wheel rotation) to settle.
pub(crate) async fn await_settled(
    channel: &Arc<dyn DeviceChannel>,
    timeout: Duration,
) -> GateResult<()> {
    match channel.wait_until(Signal::Settled, timeout).await? {
        WaitOutcome::Satisfied => Ok(()),
        WaitOutcome::TimedOut => Err(GateError::Timeout),
        WaitOutcome::Faulted(reason) => Err(GateError::Driver(reason)),
    }
}

/// What to probe and snapshot for one device kind.
///
/// `capabilities` pairs a flag name with the optional property whose
/// presence sets it. `static_numbers`/`static_texts` are read once at
/// connect; `cheap_numbers` are re-read by `polling`.
pub struct DeviceProfile {
    pub capabilities: &'static [(&'static str, &'static str)],
    pub static_numbers: &'static [&'static str],
    pub static_texts: &'static [&'static str],
    pub cheap_numbers: &'static [&'static str],
}

static CAMERA_PROFILE: DeviceProfile = DeviceProfile {
    capabilities: &[
        ("can_gain", "gain"),
        ("can_offset", "offset"),
        ("can_binning", "binning"),
        ("can_cool", "cooler"),
        ("can_abort", "abort_exposure"),
        ("can_dark", "dark"),
    ],
    static_numbers: &[
        "min_exposure",
        "max_exposure",
        "min_gain",
        "max_gain",
        "min_offset",
        "max_offset",
        "max_binning",
        "width",
        "height",
        "pixel_size_x",
        "pixel_size_y",
        "max_adu",
    ],
    static_texts: &["name", "driver"],
    cheap_numbers: &["temperature", "cooler_power"],
};

static TELESCOPE_PROFILE: DeviceProfile = DeviceProfile {
    capabilities: &[
        ("can_park", "parked"),
        ("can_track", "tracking"),
        ("can_abort", "abort_motion"),
    ],
    static_numbers: &[],
    static_texts: &["name", "driver"],
    cheap_numbers: &["ra", "dec"],
};

static FOCUSER_PROFILE: DeviceProfile = DeviceProfile {
    capabilities: &[
        ("can_abort", "abort_motion"),
        ("can_temperature", "temperature"),
    ],
    static_numbers: &["max_position"],
    static_texts: &["name", "driver"],
    cheap_numbers: &["position", "temperature"],
};

static FILTERWHEEL_PROFILE: DeviceProfile = DeviceProfile {
    capabilities: &[],
    static_numbers: &["filter_count"],
    static_texts: &["name", "driver", "filter_names"],
    cheap_numbers: &["target_filter"],
};

impl DeviceProfile {
    pub fn for_kind(kind: DeviceKind) -> &'static DeviceProfile {
        match kind {
            DeviceKind::Camera => &CAMERA_PROFILE,
            DeviceKind::Telescope => &TELESCOPE_PROFILE,
            DeviceKind::Focuser => &FOCUSER_PROFILE,
            DeviceKind::FilterWheel => &FILTERWHEEL_PROFILE,
        }
    }
}

/// Everything known about a connected device: probed capabilities, static
/// figures and the cheap fields last refreshed by `polling`. This is the
/// record persisted by `save_configuration`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub kind: DeviceKind,
    pub address: Address,
    pub capabilities: BTreeMap<String, bool>,
    pub numbers: BTreeMap<String, f64>,
    pub texts: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub fn capability(&self, flag: &str) -> bool {
        self.capabilities.get(flag).copied().unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.numbers.get(name).copied()
    }
}

struct Link {
    channel: Arc<dyn DeviceChannel>,
    snapshot: DeviceSnapshot,
}

/// Connection state machine for one device.
pub struct Session {
    kind: DeviceKind,
    profile: &'static DeviceProfile,
    ctx: Arc<AppContext>,
    link: Mutex<Option<Link>>,
}

impl Session {
    pub fn new(kind: DeviceKind, ctx: Arc<AppContext>) -> Self {
        Self {
            kind,
            profile: DeviceProfile::for_kind(kind),
            ctx,
            link: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Current snapshot, if connected.
    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.link
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|link| link.snapshot.clone()))
    }

    /// The live channel, or `NotConnected`.
    pub fn channel(&self) -> GateResult<Arc<dyn DeviceChannel>> {
        self.link
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|link| Arc::clone(&link.channel)))
            .ok_or(GateError::NotConnected)
    }

    fn store(&self, link: Option<Link>) {
        if let Ok(mut guard) = self.link.lock() {
            *guard = link;
        }
    }

    fn take_link(&self) -> Option<Link> {
        self.link.lock().ok().and_then(|mut l| l.take())
    }

    /// Mutate the stored snapshot in place (used by `polling` refresh and
    /// configuration load).
    fn update_snapshot(&self, apply: impl FnOnce(&mut DeviceSnapshot)) {
        if let Ok(mut guard) = self.link.lock() {
            if let Some(link) = guard.as_mut() {
                apply(&mut link.snapshot);
                link.snapshot.updated_at = Utc::now();
            }
        }
    }

    /// Connect with protocol defaults filling any omitted addressing fields.
    pub async fn connect(
        &self,
        flavor: BackendFlavor,
        overrides: &AddressOverrides,
    ) -> GateResult<Envelope> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(Envelope::warning(format!("{} already connected", self.kind))
                .with("info", serde_json::to_value(&snapshot)?));
        }
        let address = self.ctx.settings.address_for(flavor, overrides);
        // The push protocol addresses devices by name; there is no default.
        if address.flavor == BackendFlavor::Push && address.device_name.is_none() {
            return Err(GateError::InvalidValue(
                "device name required for push backend".to_string(),
            ));
        }
        let snapshot = self.establish(address).await?;
        info!(kind = %self.kind, device = %snapshot.name, "connected");
        Ok(Envelope::success(format!("{} connected", self.kind))
            .with("info", serde_json::to_value(&snapshot)?))
    }

    /// Open the channel, run the one-time capability probe and store the
    /// resulting link. Probe failure releases the channel before returning.
    async fn establish(&self, address: Address) -> GateResult<DeviceSnapshot> {
        let channel = self.ctx.factory.open_channel(self.kind, &address).await?;
        channel.open().await?;
        let snapshot = match self.probe(channel.as_ref(), address).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if let Err(release) = channel.close().await {
                    warn!(kind = %self.kind, error = %release, "release after failed probe");
                }
                return Err(err);
            }
        };
        self.store(Some(Link {
            channel,
            snapshot: snapshot.clone(),
        }));
        Ok(snapshot)
    }

    /// One-time probe of optional capabilities and static figures.
    ///
    /// A property the device does not carry clears its flag or is skipped;
    /// only transport failures abort the probe.
    async fn probe(
        &self,
        channel: &dyn DeviceChannel,
        address: Address,
    ) -> GateResult<DeviceSnapshot> {
        let mut capabilities = BTreeMap::new();
        for (flag, property) in self.profile.capabilities {
            let present = channel.has_property(property).await?;
            capabilities.insert((*flag).to_string(), present);
        }
        let mut numbers = BTreeMap::new();
        for property in self.profile.static_numbers {
            match channel.read_number(property).await {
                Ok(value) => {
                    numbers.insert((*property).to_string(), value);
                }
                Err(GateError::NotSupported(_)) => {}
                Err(err) => return Err(err),
            }
        }
        let mut texts = BTreeMap::new();
        for property in self.profile.static_texts {
            match channel.read_text(property).await {
                Ok(value) => {
                    texts.insert((*property).to_string(), value);
                }
                Err(GateError::NotSupported(_)) => {}
                Err(err) => return Err(err),
            }
        }
        let name = texts
            .get("name")
            .cloned()
            .or_else(|| address.device_name.clone())
            .unwrap_or_else(|| self.kind.label().to_string());
        Ok(DeviceSnapshot {
            name,
            kind: self.kind,
            address,
            capabilities,
            numbers,
            texts,
            updated_at: Utc::now(),
        })
    }

    /// Release the device handle. The state is marked Disconnected even when
    /// the release itself fails.
    pub async fn disconnect(&self) -> GateResult<Envelope> {
        let Some(link) = self.take_link() else {
            return Ok(Envelope::warning(format!("{} not connected", self.kind)));
        };
        if let Err(err) = link.channel.close().await {
            warn!(kind = %self.kind, error = %err, "backend release failed");
        }
        info!(kind = %self.kind, device = %link.snapshot.name, "disconnected");
        Ok(Envelope::success(format!("{} disconnected", self.kind)))
    }

    /// Disconnect, settle, connect again at the same address.
    ///
    /// Any failure leaves the session Disconnected.
    pub async fn reconnect(&self) -> GateResult<Envelope> {
        let address = self
            .snapshot()
            .map(|s| s.address)
            .ok_or(GateError::NotConnected)?;
        self.disconnect().await?;
        sleep(RECONNECT_SETTLE).await;
        let snapshot = self.establish(address).await?;
        Ok(Envelope::success(format!("{} reconnected", self.kind))
            .with("info", serde_json::to_value(&snapshot)?))
    }

    /// List devices discoverable on the chosen backend. Disconnected only.
    pub async fn scanning(
        &self,
        flavor: BackendFlavor,
        overrides: &AddressOverrides,
    ) -> GateResult<Envelope> {
        if self.is_connected() {
            return Ok(Envelope::warning(format!(
                "{} connected, disconnect before scanning",
                self.kind
            )));
        }
        let address = self.ctx.settings.address_for(flavor, overrides);
        let channel = self.ctx.factory.open_channel(self.kind, &address).await?;
        let devices = channel.discover().await?;
        Ok(Envelope::success(format!("found {} devices", devices.len()))
            .with("devices", serde_json::to_value(&devices)?))
    }

    /// Refresh the cheap fields of the snapshot. Not a capability re-probe.
    pub async fn polling(&self) -> GateResult<Envelope> {
        let channel = self.channel()?;
        let mut refreshed = BTreeMap::new();
        for property in self.profile.cheap_numbers {
            match channel.read_number(property).await {
                Ok(value) => {
                    refreshed.insert((*property).to_string(), value);
                }
                Err(GateError::NotSupported(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.update_snapshot(|snapshot| {
            snapshot.numbers.extend(refreshed);
        });
        let snapshot = self.snapshot().ok_or(GateError::NotConnected)?;
        Ok(Envelope::success(format!("{} status", self.kind))
            .with("info", serde_json::to_value(&snapshot)?))
    }

    fn record_path(&self, name: &str) -> std::path::PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.ctx
            .settings
            .storage
            .config_dir
            .join(self.kind.label())
            .join(format!("{safe}.json"))
    }

    /// Persist the current snapshot under `config/<kind>/<name>.json`.
    pub async fn save_configuration(&self) -> GateResult<Envelope> {
        let snapshot = self.snapshot().ok_or(GateError::NotConnected)?;
        let path = self.record_path(&snapshot.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
        Ok(Envelope::success(format!("{} configuration saved", self.kind))
            .with("path", json!(path.display().to_string())))
    }

    /// Restore the snapshot saved for the connected device's name.
    pub async fn load_configuration(&self) -> GateResult<Envelope> {
        let current = self.snapshot().ok_or(GateError::NotConnected)?;
        let path = self.record_path(&current.name);
        let raw = std::fs::read(&path)
            .map_err(|e| GateError::Config(format!("no saved configuration: {e}")))?;
        let saved: DeviceSnapshot = serde_json::from_slice(&raw)?;
        if saved.kind != self.kind {
            return Err(GateError::Config(format!(
                "saved record is for a {}, not a {}",
                saved.kind, self.kind
            )));
        }
        if let Ok(mut guard) = self.link.lock() {
            if let Some(link) = guard.as_mut() {
                link.snapshot = saved.clone();
            }
        }
        Ok(Envelope::success(format!("{} configuration loaded", self.kind))
            .with("info", serde_json::to_value(&saved)?))
    }
}
