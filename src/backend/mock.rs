//! Scripted mock hardware.
//!
//! In-memory [`DeviceChannel`] used by the test suite and by the simulated
//! channel factory the server falls back to when no real backend is wired
//! in. Every hardware-facing call is recorded so tests can assert that a
//! rejected operation never touched the device handle. Exposure behavior is
//! scripted: frames become ready after a delay, never (timeout paths), or
//! the hardware faults mid-exposure.

// Lock poisoning cannot happen here; the mock never panics while holding.
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::{sleep, Instant};

use crate::backend::{
    Address, ChannelFactory, DeviceChannel, DeviceKind, DiscoveredDevice, ElementKind, FrameBlob,
    PixelData, Signal, WaitOutcome,
};
use crate::error::{GateError, GateResult};

/// How a scripted exposure plays out.
#[derive(Clone, Debug)]
pub enum ExposureScript {
    /// Image ready after the given delay (independent of the requested
    /// exposure time, so tests stay fast).
    ReadyAfter(Duration),
    /// Image never becomes ready; waiters run out the timeout.
    NeverReady,
    /// Hardware reports an error state after the given delay.
    FaultAfter(Duration, String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ExposureState {
    Idle,
    Running { ready_at: Option<Instant>, fault_at: Option<Instant> },
    Ready,
}

struct MockState {
    numbers: BTreeMap<String, f64>,
    switches: BTreeMap<String, bool>,
    texts: BTreeMap<String, String>,
    exposure: ExposureState,
    fault_reason: String,
    settled_at: Instant,
    opened: bool,
}

/// Scripted in-memory device channel.
pub struct MockChannel {
    kind: DeviceKind,
    state: Mutex<MockState>,
    calls: Mutex<Vec<String>>,
    script: Mutex<ExposureScript>,
    /// Injected connect failure, if any.
    connect_failure: Mutex<Option<GateError>>,
    /// When false, the abort path cannot confirm the idle state.
    confirm_abort: Mutex<bool>,
    settle_after: Duration,
    discoverable: Vec<DiscoveredDevice>,
}

/// Motion targets: writing one of these starts a settling period.
const MOTION_PROPERTIES: &[&str] = &["position", "target_filter", "target_ra", "target_dec"];

impl MockChannel {
    fn with_state(kind: DeviceKind, state: MockState) -> Self {
        Self {
            kind,
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(ExposureScript::ReadyAfter(Duration::from_millis(20))),
            connect_failure: Mutex::new(None),
            confirm_abort: Mutex::new(true),
            settle_after: Duration::from_millis(10),
            discoverable: vec![DiscoveredDevice {
                name: format!("Simulated {}", kind.label()),
                driver: format!("sim_{}", kind.label()),
                kind,
            }],
        }
    }

    fn base_state(name: &str) -> MockState {
        let mut texts = BTreeMap::new();
        texts.insert("name".to_string(), name.to_string());
        texts.insert("driver".to_string(), "mock".to_string());
        MockState {
            numbers: BTreeMap::new(),
            switches: BTreeMap::new(),
            texts,
            exposure: ExposureState::Idle,
            fault_reason: String::new(),
            settled_at: Instant::now(),
            opened: false,
        }
    }

    /// A fully featured camera: gain, offset, binning, cooling, abort.
    pub fn camera() -> Self {
        let mut state = Self::base_state("Mock CCD");
        for (key, value) in [
            ("min_exposure", 0.001),
            ("max_exposure", 3600.0),
            ("gain", 20.0),
            ("min_gain", 0.0),
            ("max_gain", 300.0),
            ("offset", 10.0),
            ("min_offset", 0.0),
            ("max_offset", 100.0),
            ("binning", 1.0),
            ("max_binning", 4.0),
            ("width", 64.0),
            ("height", 48.0),
            ("pixel_size_x", 3.76),
            ("pixel_size_y", 3.76),
            ("max_adu", 65535.0),
            ("temperature", -10.0),
            ("cooler_power", 25.0),
        ] {
            state.numbers.insert(key.to_string(), value);
        }
        for (key, value) in [
            ("cooler", false),
            ("abort_exposure", false),
            ("dark", false),
            ("idle", true),
        ] {
            state.switches.insert(key.to_string(), value);
        }
        Self::with_state(DeviceKind::Camera, state)
    }

    /// A camera with no gain/offset/cooling/abort support.
    pub fn bare_camera() -> Self {
        let mut state = Self::base_state("Bare CCD");
        for (key, value) in [
            ("min_exposure", 0.001),
            ("max_exposure", 3600.0),
            ("width", 64.0),
            ("height", 48.0),
            ("max_adu", 65535.0),
        ] {
            state.numbers.insert(key.to_string(), value);
        }
        state.switches.insert("idle".to_string(), true);
        Self::with_state(DeviceKind::Camera, state)
    }

    pub fn telescope() -> Self {
        let mut state = Self::base_state("Mock Mount");
        for (key, value) in [
            ("ra", 0.0),
            ("dec", 0.0),
            ("target_ra", 0.0),
            ("target_dec", 0.0),
        ] {
            state.numbers.insert(key.to_string(), value);
        }
        for (key, value) in [
            ("parked", true),
            ("tracking", false),
            ("settled", true),
            ("abort_motion", false),
        ] {
            state.switches.insert(key.to_string(), value);
        }
        Self::with_state(DeviceKind::Telescope, state)
    }

    pub fn focuser() -> Self {
        let mut state = Self::base_state("Mock Focuser");
        for (key, value) in [
            ("position", 5000.0),
            ("max_position", 60000.0),
            ("temperature", 4.5),
        ] {
            state.numbers.insert(key.to_string(), value);
        }
        state.switches.insert("settled".to_string(), true);
        state.switches.insert("abort_motion".to_string(), false);
        Self::with_state(DeviceKind::Focuser, state)
    }

    pub fn filterwheel() -> Self {
        let mut state = Self::base_state("Mock Wheel");
        state.numbers.insert("target_filter".to_string(), 1.0);
        state.numbers.insert("filter_count".to_string(), 5.0);
        state.switches.insert("settled".to_string(), true);
        state
            .texts
            .insert("filter_names".to_string(), "L,R,G,B,Ha".to_string());
        Self::with_state(DeviceKind::FilterWheel, state)
    }

    /// Replace the exposure script.
    pub fn script(&self, script: ExposureScript) {
        *self.script.lock().unwrap() = script;
    }

    /// Make the next `open` fail with the given error.
    pub fn fail_connect(&self, error: GateError) {
        *self.connect_failure.lock().unwrap() = Some(error);
    }

    /// Simulate a camera that cannot confirm idle after an abort.
    pub fn refuse_abort_confirmation(&self) {
        *self.confirm_abort.lock().unwrap() = false;
    }

    /// Remove a property so the capability probe reports it absent.
    pub fn remove_property(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.numbers.remove(name);
        state.switches.remove(name);
        state.texts.remove(name);
    }

    /// Every hardware-facing call recorded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose name matches `name`.
    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name || c.starts_with(&format!("{name}(")))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn exposure_outcome(&self) -> Option<WaitOutcome> {
        let mut state = self.state.lock().unwrap();
        match state.exposure {
            ExposureState::Ready => Some(WaitOutcome::Satisfied),
            ExposureState::Running { ready_at, fault_at } => {
                let now = Instant::now();
                if let Some(at) = fault_at {
                    if now >= at {
                        state.exposure = ExposureState::Idle;
                        return Some(WaitOutcome::Faulted(state.fault_reason.clone()));
                    }
                }
                if let Some(at) = ready_at {
                    if now >= at {
                        state.exposure = ExposureState::Ready;
                        return Some(WaitOutcome::Satisfied);
                    }
                }
                None
            }
            ExposureState::Idle => None,
        }
    }
}

#[async_trait]
impl DeviceChannel for MockChannel {
    async fn open(&self) -> GateResult<()> {
        self.record("open");
        if let Some(err) = self.connect_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.state.lock().unwrap().opened = true;
        Ok(())
    }

    async fn close(&self) -> GateResult<()> {
        self.record("close");
        self.state.lock().unwrap().opened = false;
        Ok(())
    }

    async fn has_property(&self, name: &str) -> GateResult<bool> {
        self.record(format!("has_property({name})"));
        let state = self.state.lock().unwrap();
        Ok(state.numbers.contains_key(name)
            || state.switches.contains_key(name)
            || state.texts.contains_key(name))
    }

    async fn read_number(&self, name: &str) -> GateResult<f64> {
        self.record(format!("read_number({name})"));
        self.state
            .lock()
            .unwrap()
            .numbers
            .get(name)
            .copied()
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn write_number(&self, name: &str, value: f64) -> GateResult<()> {
        self.record(format!("write_number({name})"));
        let mut state = self.state.lock().unwrap();
        if !state.numbers.contains_key(name) {
            return Err(GateError::NotSupported(name.to_string()));
        }
        state.numbers.insert(name.to_string(), value);
        if MOTION_PROPERTIES.contains(&name) {
            state.settled_at = Instant::now() + self.settle_after;
            state.switches.insert("settled".to_string(), false);
        }
        Ok(())
    }

    async fn read_switch(&self, name: &str) -> GateResult<bool> {
        self.record(format!("read_switch({name})"));
        let state = self.state.lock().unwrap();
        if name == "settled" {
            return Ok(Instant::now() >= state.settled_at);
        }
        state
            .switches
            .get(name)
            .copied()
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn write_switch(&self, name: &str, on: bool) -> GateResult<()> {
        self.record(format!("write_switch({name})"));
        let mut state = self.state.lock().unwrap();
        if !state.switches.contains_key(name) {
            return Err(GateError::NotSupported(name.to_string()));
        }
        state.switches.insert(name.to_string(), on);
        Ok(())
    }

    async fn read_text(&self, name: &str) -> GateResult<String> {
        self.record(format!("read_text({name})"));
        self.state
            .lock()
            .unwrap()
            .texts
            .get(name)
            .cloned()
            .ok_or_else(|| GateError::NotSupported(name.to_string()))
    }

    async fn discover(&self) -> GateResult<Vec<DiscoveredDevice>> {
        self.record("discover");
        Ok(self.discoverable.clone())
    }

    async fn wait_until(&self, signal: Signal, timeout: Duration) -> GateResult<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let outcome = match signal {
                Signal::ImageReady => self.exposure_outcome(),
                Signal::Settled => {
                    let state = self.state.lock().unwrap();
                    (Instant::now() >= state.settled_at).then_some(WaitOutcome::Satisfied)
                }
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            sleep(Duration::from_millis(2)).await;
        }
    }

    async fn begin_exposure(&self, seconds: f64, dark: bool) -> GateResult<()> {
        self.record(format!("begin_exposure({seconds},{dark})"));
        let script = self.script.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.exposure = match script {
            ExposureScript::ReadyAfter(delay) => ExposureState::Running {
                ready_at: Some(now + delay),
                fault_at: None,
            },
            ExposureScript::NeverReady => ExposureState::Running {
                ready_at: None,
                fault_at: None,
            },
            ExposureScript::FaultAfter(delay, reason) => {
                state.fault_reason = reason;
                ExposureState::Running {
                    ready_at: None,
                    fault_at: Some(now + delay),
                }
            }
        };
        state.switches.insert("idle".to_string(), false);
        Ok(())
    }

    async fn halt_exposure(&self) -> GateResult<()> {
        self.record("halt_exposure");
        let mut state = self.state.lock().unwrap();
        state.exposure = ExposureState::Idle;
        let confirmed = *self.confirm_abort.lock().unwrap();
        state.switches.insert("idle".to_string(), confirmed);
        Ok(())
    }

    async fn read_frame(&self) -> GateResult<FrameBlob> {
        self.record("read_frame");
        let mut state = self.state.lock().unwrap();
        if state.exposure != ExposureState::Ready {
            return Err(GateError::InvalidOperation("no frame available".to_string()));
        }
        state.exposure = ExposureState::Idle;
        state.switches.insert("idle".to_string(), true);
        let width = state.numbers.get("width").copied().unwrap_or(64.0) as u32;
        let height = state.numbers.get("height").copied().unwrap_or(48.0) as u32;
        let max_adu = state.numbers.get("max_adu").copied().unwrap_or(65535.0) as u64;
        drop(state);
        let mut rng = rand::thread_rng();
        let pixels = (0..(width * height))
            .map(|_| rng.gen_range(0..1024u16))
            .collect();
        Ok(FrameBlob {
            width,
            height,
            element: ElementKind::U16,
            max_adu,
            data: PixelData::U16(pixels),
        })
    }
}

/// Channel factory over pre-registered mock devices.
///
/// Tests register the channels they want to inspect; the simulated server
/// configuration registers one preset per kind.
pub struct MockFactory {
    channels: Mutex<HashMap<DeviceKind, Arc<MockChannel>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// One preset device of every kind.
    pub fn simulated() -> Self {
        let factory = Self::new();
        factory.register(Arc::new(MockChannel::camera()));
        factory.register(Arc::new(MockChannel::telescope()));
        factory.register(Arc::new(MockChannel::focuser()));
        factory.register(Arc::new(MockChannel::filterwheel()));
        factory
    }

    pub fn register(&self, channel: Arc<MockChannel>) {
        self.channels
            .lock()
            .unwrap()
            .insert(channel.kind, channel);
    }

    pub fn channel(&self, kind: DeviceKind) -> Option<Arc<MockChannel>> {
        self.channels.lock().unwrap().get(&kind).cloned()
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelFactory for MockFactory {
    async fn open_channel(
        &self,
        kind: DeviceKind,
        _address: &Address,
    ) -> GateResult<Arc<dyn DeviceChannel>> {
        self.channel(kind)
            .map(|ch| ch as Arc<dyn DeviceChannel>)
            .ok_or_else(|| GateError::Driver(format!("no {kind} registered")))
    }
}
