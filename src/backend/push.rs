//! Push-style protocol adapter.
//!
//! The push backend is event driven: after connecting, the device server
//! asynchronously announces property vectors, value updates and binary blobs
//! for every device it hosts. One [`PushClient`] is shared process-wide by
//! all push sessions; every outbound command funnels through a single
//! composer task so concurrent sessions never interleave writes on the wire.
//! Inbound updates are ingested into per-device property tables, and
//! `wait_until` blocks on a change notification instead of re-reading the
//! device.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::backend::{DeviceChannel, DeviceKind, DiscoveredDevice, FrameBlob, Signal, WaitOutcome};
use crate::error::{GateError, GateResult};

/// Outbound commands on the push wire.
#[derive(Clone, Debug, PartialEq)]
pub enum PushCommand {
    Connect { device: String },
    Disconnect { device: String },
    EnableBlob { device: String },
    SetNumber { device: String, name: String, value: f64 },
    SetSwitch { device: String, name: String, on: bool },
    SetText { device: String, name: String, value: String },
}

/// Inbound notifications from the push wire.
#[derive(Clone, Debug)]
pub enum PushUpdate {
    /// Device enumeration. `kind` may be absent; it is then inferred from
    /// the driver label.
    Device {
        name: String,
        driver: String,
        kind: Option<DeviceKind>,
    },
    Number {
        device: String,
        name: String,
        value: f64,
    },
    Switch {
        device: String,
        name: String,
        on: bool,
    },
    Text {
        device: String,
        name: String,
        value: String,
    },
    Blob {
        device: String,
        frame: FrameBlob,
    },
    Fault {
        device: String,
        reason: String,
    },
}

/// The raw push wire. Only sending lives here; received updates are fed to
/// [`PushClient::ingest`] by whoever owns the read side.
#[async_trait]
pub trait PushWire: Send + Sync {
    async fn send(&self, command: PushCommand) -> GateResult<()>;
}

/// Guess a device kind from its driver label, for discovery listings.
pub fn infer_kind(driver: &str) -> DeviceKind {
    let label = driver.to_ascii_lowercase();
    if label.contains("wheel") || label.contains("cfw") {
        DeviceKind::FilterWheel
    } else if label.contains("focus") {
        DeviceKind::Focuser
    } else if label.contains("telescope") || label.contains("mount") || label.contains("eqmod") {
        DeviceKind::Telescope
    } else {
        DeviceKind::Camera
    }
}

/// State mirrored for one remote device.
#[derive(Default)]
struct DeviceTable {
    driver: String,
    kind: Option<DeviceKind>,
    numbers: BTreeMap<String, f64>,
    switches: BTreeMap<String, bool>,
    texts: BTreeMap<String, String>,
    blob: Option<FrameBlob>,
    fault: Option<String>,
}

struct Composed {
    command: PushCommand,
    ack: oneshot::Sender<GateResult<()>>,
}

/// Shared push-protocol client.
///
/// All sessions using the push backend hold the same `Arc<PushClient>`.
pub struct PushClient {
    tx: mpsc::Sender<Composed>,
    tables: Mutex<HashMap<String, DeviceTable>>,
    /// Bumped on every ingested update; waiters watch it.
    event_tx: watch::Sender<u64>,
}

impl PushClient {
    /// Spawn the composer task over `wire` and return the shared client.
    pub fn new(wire: Arc<dyn PushWire>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Composed>(64);
        tokio::spawn(async move {
            // Single writer: outbound commands are serialized here.
            while let Some(composed) = rx.recv().await {
                let result = wire.send(composed.command).await;
                if let Err(err) = &result {
                    warn!(error = %err, "push wire send failed");
                }
                let _ = composed.ack.send(result);
            }
        });
        let (event_tx, _) = watch::channel(0);
        Arc::new(Self {
            tx,
            tables: Mutex::new(HashMap::new()),
            event_tx,
        })
    }

    /// Queue one command through the composer and wait for it to hit the
    /// wire.
    pub async fn send(&self, command: PushCommand) -> GateResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Composed { command, ack })
            .await
            .map_err(|_| GateError::Network("push composer is gone".to_string()))?;
        done.await
            .map_err(|_| GateError::Network("push composer dropped the command".to_string()))?
    }

    /// Feed one inbound notification into the device tables.
    pub async fn ingest(&self, update: PushUpdate) {
        {
            let mut tables = self.tables.lock().await;
            match update {
                PushUpdate::Device { name, driver, kind } => {
                    let table = tables.entry(name).or_default();
                    table.driver = driver;
                    table.kind = kind;
                }
                PushUpdate::Number {
                    device,
                    name,
                    value,
                } => {
                    tables.entry(device).or_default().numbers.insert(name, value);
                }
                PushUpdate::Switch { device, name, on } => {
                    tables.entry(device).or_default().switches.insert(name, on);
                }
                PushUpdate::Text {
                    device,
                    name,
                    value,
                } => {
                    tables.entry(device).or_default().texts.insert(name, value);
                }
                PushUpdate::Blob { device, frame } => {
                    debug!(device = %device, "blob received");
                    tables.entry(device).or_default().blob = Some(frame);
                }
                PushUpdate::Fault { device, reason } => {
                    tables.entry(device).or_default().fault = Some(reason);
                }
            }
        }
        self.event_tx.send_modify(|n| *n += 1);
    }

    /// Devices currently announced by the server.
    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        let tables = self.tables.lock().await;
        tables
            .iter()
            .map(|(name, table)| DiscoveredDevice {
                name: name.clone(),
                driver: table.driver.clone(),
                kind: table.kind.unwrap_or_else(|| infer_kind(&table.driver)),
            })
            .collect()
    }

    async fn known(&self, device: &str) -> bool {
        self.tables.lock().await.contains_key(device)
    }
}

/// Per-device [`DeviceChannel`] over the shared client.
pub struct PushChannel {
    client: Arc<PushClient>,
    device: String,
}

impl PushChannel {
    pub fn new(client: Arc<PushClient>, device: impl Into<String>) -> Self {
        Self {
            client,
            device: device.into(),
        }
    }

    async fn with_table<T>(&self, read: impl FnOnce(&DeviceTable) -> T) -> GateResult<T> {
        let tables = self.client.tables.lock().await;
        tables
            .get(&self.device)
            .map(read)
            .ok_or_else(|| GateError::Driver(format!("device '{}' not announced", self.device)))
    }

    /// Check the waited-for condition against the mirrored state.
    async fn signal_state(&self, signal: Signal) -> GateResult<Option<WaitOutcome>> {
        self.with_table(|table| {
            if let Some(reason) = &table.fault {
                return Some(WaitOutcome::Faulted(reason.clone()));
            }
            let satisfied = match signal {
                Signal::ImageReady => table.blob.is_some(),
                Signal::Settled => table.switches.get("settled").copied().unwrap_or(false),
            };
            satisfied.then_some(WaitOutcome::Satisfied)
        })
        .await
    }
}

#[async_trait]
impl DeviceChannel for PushChannel {
    async fn open(&self) -> GateResult<()> {
        if !self.client.known(&self.device).await {
            return Err(GateError::Driver(format!(
                "device '{}' not announced by the server",
                self.device
            )));
        }
        self.client
            .send(PushCommand::Connect {
                device: self.device.clone(),
            })
            .await?;
        // Blob delivery is opt-in per device.
        self.client
            .send(PushCommand::EnableBlob {
                device: self.device.clone(),
            })
            .await
    }

    async fn close(&self) -> GateResult<()> {
        self.client
            .send(PushCommand::Disconnect {
                device: self.device.clone(),
            })
            .await
    }

    /// Presence of the named vector in the announced table. Absence only
    /// clears the capability flag, it is never a failure.
    async fn has_property(&self, name: &str) -> GateResult<bool> {
        self.with_table(|table| {
            table.numbers.contains_key(name)
                || table.switches.contains_key(name)
                || table.texts.contains_key(name)
        })
        .await
    }

    async fn read_number(&self, name: &str) -> GateResult<f64> {
        self.with_table(|table| table.numbers.get(name).copied())
            .await?
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn write_number(&self, name: &str, value: f64) -> GateResult<()> {
        self.client
            .send(PushCommand::SetNumber {
                device: self.device.clone(),
                name: name.to_string(),
                value,
            })
            .await
    }

    async fn read_switch(&self, name: &str) -> GateResult<bool> {
        self.with_table(|table| table.switches.get(name).copied())
            .await?
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn write_switch(&self, name: &str, on: bool) -> GateResult<()> {
        self.client
            .send(PushCommand::SetSwitch {
                device: self.device.clone(),
                name: name.to_string(),
                on,
            })
            .await
    }

    async fn read_text(&self, name: &str) -> GateResult<String> {
        self.with_table(|table| table.texts.get(name).cloned())
            .await?
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn discover(&self) -> GateResult<Vec<DiscoveredDevice>> {
        Ok(self.client.devices().await)
    }

    /// Event wait: block on the client's update notification until the
    /// condition holds or the deadline passes. No device round-trips.
    async fn wait_until(&self, signal: Signal, timeout: Duration) -> GateResult<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut events = self.client.event_tx.subscribe();
        loop {
            if let Some(outcome) = self.signal_state(signal).await? {
                return Ok(outcome);
            }
            match timeout_at(deadline, events.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(GateError::Network("push client is gone".to_string()));
                }
                Err(_) => return Ok(WaitOutcome::TimedOut),
            }
        }
    }

    async fn begin_exposure(&self, seconds: f64, dark: bool) -> GateResult<()> {
        {
            // Drop any stale frame so ImageReady reflects this exposure.
            let mut tables = self.client.tables.lock().await;
            if let Some(table) = tables.get_mut(&self.device) {
                table.blob = None;
                table.fault = None;
            }
        }
        if dark {
            self.write_switch("dark", true).await?;
        }
        self.write_number("exposure", seconds).await
    }

    async fn halt_exposure(&self) -> GateResult<()> {
        self.write_switch("abort_exposure", true).await
    }

    async fn read_frame(&self) -> GateResult<FrameBlob> {
        let mut tables = self.client.tables.lock().await;
        let table = tables
            .get_mut(&self.device)
            .ok_or_else(|| GateError::Driver(format!("device '{}' not announced", self.device)))?;
        table
            .blob
            .take()
            .ok_or_else(|| GateError::InvalidOperation("no frame available".to_string()))
    }
}
