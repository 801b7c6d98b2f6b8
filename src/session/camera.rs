//! Camera session: the exposure state machine and sequence runner.
//!
//! One exposure job at a time. The phase lives in a `watch` channel so the
//! monitor task, the abort path and the sequence runner all observe
//! transitions without polling; `abort_exposure` forces a terminal phase and
//! every waiter wakes immediately instead of running out the timeout.
//!
//! The monitor task samples the backend through `wait_until(ImageReady)` for
//! the requested exposure time plus a configured margin, then resolves the
//! completion envelope that the dispatcher forwards as an unsolicited
//! signal. A scoped guard guarantees the phase never stays `Exposing` past
//! the monitor's exit, whatever path it takes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::backend::{DeviceChannel, Signal, WaitOutcome};
use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};
use crate::imaging;
use crate::session::Session;

const DEFAULT_GAIN: f64 = 20.0;
const DEFAULT_OFFSET: f64 = 20.0;
const DEFAULT_BINNING: f64 = 1.0;

/// Exposure job phases. `Idle` is both initial and terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposurePhase {
    Idle,
    Exposing,
    Downloading,
    Ready,
    Aborted,
    Error,
}

impl ExposurePhase {
    /// Phases from which a new exposure may start.
    fn startable(self) -> bool {
        matches!(
            self,
            ExposurePhase::Idle
                | ExposurePhase::Ready
                | ExposurePhase::Aborted
                | ExposurePhase::Error
        )
    }
}

/// Client-supplied exposure request.
#[derive(Clone, Debug, Deserialize)]
pub struct ExposureSpec {
    pub exposure: f64,
    pub gain: Option<f64>,
    pub offset: Option<f64>,
    pub binning: Option<f64>,
    #[serde(default)]
    pub dark: bool,
}

/// Parameters actually applied to the hardware, kept for result metadata.
#[derive(Clone, Debug)]
struct ExposureRecord {
    seconds: f64,
    gain: Option<f64>,
    offset: Option<f64>,
    binning: Option<f64>,
    dark: bool,
    started_at: DateTime<Utc>,
}

/// One frame of a sequence plan.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameSpec {
    pub exposure: f64,
    pub gain: Option<f64>,
    pub offset: Option<f64>,
    pub binning: Option<f64>,
    #[serde(default)]
    pub dark: bool,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct SequencePlan {
    pub frames: Vec<FrameSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceState {
    Running,
    Paused,
    Completed,
    Aborted,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SequenceCommand {
    Run,
    Pause,
    Abort,
}

/// Progress record for the running (or last) sequence.
#[derive(Clone, Debug, Serialize)]
pub struct SequenceStatus {
    pub state: SequenceState,
    pub current_frame: usize,
    pub total_frames: usize,
    pub completed: u32,
    pub results: Vec<Envelope>,
}

struct SequenceHandle {
    control: watch::Sender<SequenceCommand>,
    status: Arc<Mutex<SequenceStatus>>,
}

/// Camera session: the generic lifecycle plus exposure control.
pub struct CameraSession {
    session: Session,
    phase: watch::Sender<ExposurePhase>,
    current: Mutex<Option<ExposureRecord>>,
    sequence: Mutex<Option<SequenceHandle>>,
}

/// Clears a leaked `Exposing` phase when the monitor unwinds early.
struct ExposingGuard<'a> {
    phase: &'a watch::Sender<ExposurePhase>,
}

impl Drop for ExposingGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_if_modified(|p| {
            if *p == ExposurePhase::Exposing {
                *p = ExposurePhase::Error;
                true
            } else {
                false
            }
        });
    }
}

impl CameraSession {
    pub fn new(session: Session) -> Arc<Self> {
        let (phase, _) = watch::channel(ExposurePhase::Idle);
        Arc::new(Self {
            session,
            phase,
            current: Mutex::new(None),
            sequence: Mutex::new(None),
        })
    }

    pub fn base(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> ExposurePhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, next: ExposurePhase) {
        self.phase.send_replace(next);
    }

    /// Transition to `next` only if still `Exposing`; returns whether the
    /// transition happened.
    fn finish_exposing(&self, next: ExposurePhase) -> bool {
        self.phase.send_if_modified(|p| {
            if *p == ExposurePhase::Exposing {
                *p = next;
                true
            } else {
                false
            }
        })
    }

    /// Abort any in-flight exposure and sequence, then release the handle.
    ///
    /// Disconnect never leaves hardware exposing into a dead handle: the
    /// stop is sent best-effort before the release.
    pub async fn disconnect(&self) -> GateResult<Envelope> {
        if let Some(handle) = self.sequence.lock().ok().and_then(|s| {
            s.as_ref().map(|h| h.control.clone())
        }) {
            let _ = handle.send(SequenceCommand::Abort);
        }
        if self.phase() == ExposurePhase::Exposing {
            self.set_phase(ExposurePhase::Aborted);
            if let Ok(channel) = self.session.channel() {
                if let Err(err) = channel.halt_exposure().await {
                    warn!(error = %err, "exposure stop before disconnect failed");
                }
            }
        }
        self.session.disconnect().await
    }

    /// Start one exposure. On success the hardware is exposing and the
    /// returned receiver resolves with the completion (or timeout) envelope.
    pub async fn start_exposure(
        self: &Arc<Self>,
        spec: ExposureSpec,
    ) -> GateResult<(Envelope, oneshot::Receiver<Envelope>)> {
        let channel = self.session.channel()?;
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;

        // Validation happens before any state transition or hardware call.
        let min = snapshot.number("min_exposure").unwrap_or(0.0);
        let max = snapshot.number("max_exposure").unwrap_or(f64::MAX);
        if !(spec.exposure > min && spec.exposure < max) {
            return Err(GateError::InvalidValue(format!(
                "exposure {}s outside ({min}, {max})",
                spec.exposure
            )));
        }

        let mut warnings = Vec::new();
        let gain = settle_parameter(
            &snapshot, "can_gain", "gain", spec.gain, DEFAULT_GAIN,
            "min_gain", "max_gain", &mut warnings,
        );
        let offset = settle_parameter(
            &snapshot, "can_offset", "offset", spec.offset, DEFAULT_OFFSET,
            "min_offset", "max_offset", &mut warnings,
        );
        let binning = settle_binning(&snapshot, spec.binning, &mut warnings);
        let dark = if spec.dark && !snapshot.capability("can_dark") {
            warnings.push("dark frames not supported, taking a light frame".to_string());
            false
        } else {
            spec.dark
        };

        let accepted = self.phase.send_if_modified(|p| {
            if p.startable() {
                *p = ExposurePhase::Exposing;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(GateError::InvalidOperation(
                "exposure in progress".to_string(),
            ));
        }

        if let Err(err) = self.apply_settings(&channel, gain, offset, binning).await {
            self.set_phase(ExposurePhase::Idle);
            return Err(err);
        }
        if let Err(err) = channel.begin_exposure(spec.exposure, dark).await {
            self.set_phase(ExposurePhase::Idle);
            return Err(err);
        }

        if let Ok(mut current) = self.current.lock() {
            *current = Some(ExposureRecord {
                seconds: spec.exposure,
                gain,
                offset,
                binning,
                dark,
                started_at: Utc::now(),
            });
        }
        info!(seconds = spec.exposure, dark, "exposure started");

        let budget = Duration::from_secs_f64(spec.exposure)
            + self.session.context().settings.exposure.margin;
        let (done_tx, done_rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let envelope = this.monitor(channel, budget).await;
            let _ = done_tx.send(envelope);
        });

        let reply = if warnings.is_empty() {
            Envelope::success("exposure started")
        } else {
            Envelope::warning("exposure started with adjusted parameters")
                .with("warnings", json!(warnings))
        };
        Ok((reply, done_rx))
    }

    async fn apply_settings(
        &self,
        channel: &Arc<dyn DeviceChannel>,
        gain: Option<f64>,
        offset: Option<f64>,
        binning: Option<f64>,
    ) -> GateResult<()> {
        for (name, value) in [("gain", gain), ("offset", offset), ("binning", binning)] {
            if let Some(value) = value {
                channel.write_number(name, value).await?;
            }
        }
        Ok(())
    }

    /// Watches the backend until the frame is ready, the budget runs out,
    /// the hardware faults, or an abort forces the phase terminal.
    async fn monitor(&self, channel: Arc<dyn DeviceChannel>, budget: Duration) -> Envelope {
        let guard = ExposingGuard { phase: &self.phase };
        let mut phases = self.phase.subscribe();
        let outcome = tokio::select! {
            outcome = channel.wait_until(Signal::ImageReady, budget) => Some(outcome),
            _ = phases.wait_for(|p| *p != ExposurePhase::Exposing) => None,
        };
        let envelope = match outcome {
            // Phase was forced terminal externally (abort or disconnect).
            None => Envelope::warning("exposure aborted"),
            Some(Ok(WaitOutcome::Satisfied)) => {
                self.finish_exposing(ExposurePhase::Ready);
                Envelope::success("exposure finished").with("state", json!("ready"))
            }
            Some(Ok(WaitOutcome::TimedOut)) => {
                self.finish_exposing(ExposurePhase::Aborted);
                Envelope::from(GateError::Timeout).with("state", json!("aborted"))
            }
            Some(Ok(WaitOutcome::Faulted(reason))) => {
                self.finish_exposing(ExposurePhase::Error);
                Envelope::from(GateError::Driver(reason))
            }
            Some(Err(err)) => {
                self.finish_exposing(ExposurePhase::Error);
                Envelope::from(err)
            }
        };
        drop(guard);
        envelope
    }

    /// Stop the in-flight exposure. No hardware call unless exposing.
    pub async fn abort_exposure(&self) -> GateResult<Envelope> {
        if self.phase() != ExposurePhase::Exposing {
            return Ok(Envelope::warning("camera not exposing"));
        }
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_abort") {
            return Err(GateError::NotSupported("exposure abort".to_string()));
        }
        let channel = self.session.channel()?;
        // Force the completion signal terminal first so waiters wake now.
        self.set_phase(ExposurePhase::Aborted);
        channel.halt_exposure().await?;
        match channel.read_switch("idle").await {
            Ok(true) | Err(GateError::NotSupported(_)) => {
                self.set_phase(ExposurePhase::Idle);
                Ok(Envelope::success("exposure aborted"))
            }
            Ok(false) => Err(GateError::Driver(
                "camera did not confirm idle state after abort".to_string(),
            )),
            Err(err) => Err(err),
        }
    }

    /// Download the finished frame and reset to `Idle`.
    pub async fn get_exposure_result(&self) -> GateResult<Envelope> {
        let channel = self.session.channel()?;
        let accepted = self.phase.send_if_modified(|p| {
            if *p == ExposurePhase::Ready {
                *p = ExposurePhase::Downloading;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(GateError::InvalidOperation(
                "no exposure result ready".to_string(),
            ));
        }
        let frame = match channel.read_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                self.set_phase(ExposurePhase::Error);
                return Err(err);
            }
        };
        let record = self.current.lock().ok().and_then(|c| c.clone());
        let depth = imaging::bit_depth(&frame);
        let histogram = imaging::histogram(&frame);
        let encoded = imaging::encode_pixels(&frame);

        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        let started_at = record.as_ref().map(|r| r.started_at).unwrap_or_else(Utc::now);
        let mut metadata = json!({
            "device": snapshot.name,
            "timestamp": started_at.to_rfc3339(),
            "width": frame.width,
            "height": frame.height,
            "depth": depth,
            "max_adu": frame.max_adu,
        });
        if let (Some(meta), Some(record)) = (metadata.as_object_mut(), record.as_ref()) {
            meta.insert("exposure".to_string(), json!(record.seconds));
            meta.insert("dark".to_string(), json!(record.dark));
            for (key, value) in [
                ("gain", record.gain),
                ("offset", record.offset),
                ("binning", record.binning),
            ] {
                if let Some(value) = value {
                    meta.insert(key.to_string(), json!(value));
                }
            }
        }

        let stem = format!(
            "{}_{}",
            snapshot.name.replace([' ', '/'], "_"),
            started_at.format("%Y%m%dT%H%M%S")
        );
        let image_dir = &self.session.context().settings.storage.image_dir;
        let saved_path = match imaging::persist_frame(image_dir, &stem, &frame, &metadata) {
            Ok(path) => Some(path.display().to_string()),
            Err(err) => {
                warn!(error = %err, "frame persistence failed");
                None
            }
        };

        self.set_phase(ExposurePhase::Idle);
        let mut envelope = Envelope::success("exposure result")
            .with("metadata", metadata)
            .with("histogram", json!(histogram))
            .with("data", json!(encoded));
        if let Some(path) = saved_path {
            envelope = envelope.with("path", json!(path));
        }
        Ok(envelope)
    }

    /// Current exposure phase and elapsed time.
    pub async fn get_exposure_status(&self) -> GateResult<Envelope> {
        let phase = self.phase();
        let mut envelope =
            Envelope::success("exposure status").with("state", serde_json::to_value(phase)?);
        if phase == ExposurePhase::Exposing {
            if let Some(record) = self.current.lock().ok().and_then(|c| c.clone()) {
                let elapsed = (Utc::now() - record.started_at).num_milliseconds() as f64 / 1000.0;
                envelope = envelope
                    .with("elapsed", json!(elapsed))
                    .with("exposure", json!(record.seconds));
            }
        }
        Ok(envelope)
    }

    /// Switch the cooler. Requires the cooling capability.
    pub async fn start_cooling(&self, on: bool) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_cool") {
            return Err(GateError::NotSupported("cooling".to_string()));
        }
        let channel = self.session.channel()?;
        channel.write_switch("cooler", on).await?;
        Ok(Envelope::success(if on {
            "cooler on"
        } else {
            "cooler off"
        }))
    }

    /// Cooler state, sensor temperature and cooler power where available.
    pub async fn get_cooling_status(&self) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_cool") {
            return Err(GateError::NotSupported("cooling".to_string()));
        }
        let channel = self.session.channel()?;
        let mut envelope = Envelope::success("cooling status")
            .with("cooler", json!(channel.read_switch("cooler").await?));
        for property in ["temperature", "cooler_power"] {
            match channel.read_number(property).await {
                Ok(value) => envelope = envelope.with(property, json!(value)),
                Err(GateError::NotSupported(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(envelope)
    }

    // ---- sequence exposures ----

    fn sequence_control(&self) -> Option<watch::Sender<SequenceCommand>> {
        self.sequence
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|h| h.control.clone()))
    }

    fn sequence_active(&self) -> bool {
        self.sequence
            .lock()
            .ok()
            .and_then(|s| {
                s.as_ref().map(|h| {
                    matches!(
                        h.status.lock().map(|st| st.state),
                        Ok(SequenceState::Running) | Ok(SequenceState::Paused)
                    )
                })
            })
            .unwrap_or(false)
    }

    /// Run a multi-frame plan in the background.
    ///
    /// Frame-level validation and timeout failures are accumulated and the
    /// plan continues with the next frame; hardware faults and transport
    /// failures halt the whole sequence.
    pub async fn start_sequence_exposure(
        self: &Arc<Self>,
        plan: SequencePlan,
    ) -> GateResult<Envelope> {
        if !self.session.is_connected() {
            return Err(GateError::NotConnected);
        }
        if plan.frames.is_empty() {
            return Err(GateError::InvalidValue("empty sequence plan".to_string()));
        }
        if self.sequence_active() || self.phase() == ExposurePhase::Exposing {
            return Err(GateError::InvalidOperation(
                "sequence in progress".to_string(),
            ));
        }
        let total: u32 = plan.frames.iter().map(|f| f.repeat.max(1)).sum();
        let (control, control_rx) = watch::channel(SequenceCommand::Run);
        let status = Arc::new(Mutex::new(SequenceStatus {
            state: SequenceState::Running,
            current_frame: 0,
            total_frames: total as usize,
            completed: 0,
            results: Vec::new(),
        }));
        if let Ok(mut slot) = self.sequence.lock() {
            *slot = Some(SequenceHandle {
                control,
                status: Arc::clone(&status),
            });
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_sequence(plan, control_rx, status).await;
        });
        Ok(Envelope::success("sequence started").with("total_frames", json!(total)))
    }

    async fn run_sequence(
        self: Arc<Self>,
        plan: SequencePlan,
        mut control: watch::Receiver<SequenceCommand>,
        status: Arc<Mutex<SequenceStatus>>,
    ) {
        let set_state = |state: SequenceState| {
            if let Ok(mut st) = status.lock() {
                st.state = state;
            }
        };
        let record = |envelope: Envelope| {
            if let Ok(mut st) = status.lock() {
                st.results.push(envelope);
            }
        };
        let snapshot = match self.session.snapshot() {
            Some(s) => s,
            None => {
                set_state(SequenceState::Failed);
                return;
            }
        };

        let mut frame_index = 0usize;
        for frame in &plan.frames {
            for _ in 0..frame.repeat.max(1) {
                frame_index += 1;
                if let Ok(mut st) = status.lock() {
                    st.current_frame = frame_index;
                }

                // Pause holds at the frame boundary; abort discards the rest.
                if hold_while_paused(&mut control, &status).await == SequenceCommand::Abort {
                    set_state(SequenceState::Aborted);
                    return;
                }

                // Gain/offset become mandatory when the capability exists.
                if let Some(missing) = missing_mandatory(&snapshot, frame) {
                    record(Envelope::from(GateError::InvalidValue(format!(
                        "frame {frame_index}: {missing} required"
                    ))));
                    break; // skip remaining repeats of this frame spec
                }

                let spec = ExposureSpec {
                    exposure: frame.exposure,
                    gain: frame.gain,
                    offset: frame.offset,
                    binning: frame.binning,
                    dark: frame.dark,
                };
                let done = match self.start_exposure(spec).await {
                    Ok((_, done)) => done,
                    Err(err) => {
                        let fatal =
                            matches!(err, GateError::Driver(_) | GateError::Network(_));
                        record(Envelope::from(err));
                        if fatal {
                            set_state(SequenceState::Failed);
                            return;
                        }
                        continue;
                    }
                };

                let completion = tokio::select! {
                    completion = done => completion.ok(),
                    // The watch guard must not outlive the wait; the abort
                    // below awaits inside this arm.
                    _ = async {
                        let _ = control.wait_for(|c| *c == SequenceCommand::Abort).await;
                    } => {
                        if let Err(err) = self.abort_exposure().await {
                            warn!(error = %err, "sequence abort stop failed");
                        }
                        set_state(SequenceState::Aborted);
                        return;
                    }
                };
                let Some(completion) = completion else {
                    set_state(SequenceState::Failed);
                    return;
                };

                if self.phase() == ExposurePhase::Ready {
                    match self.get_exposure_result().await {
                        Ok(envelope) => {
                            if let Ok(mut st) = status.lock() {
                                st.completed += 1;
                                st.results.push(envelope);
                            }
                        }
                        Err(err) => {
                            let fatal =
                                matches!(err, GateError::Driver(_) | GateError::Network(_));
                            record(Envelope::from(err));
                            if fatal {
                                set_state(SequenceState::Failed);
                                return;
                            }
                        }
                    }
                } else {
                    // Timeout or hardware fault; the completion envelope says which.
                    let fatal = self.phase() == ExposurePhase::Error;
                    record(completion);
                    if fatal {
                        set_state(SequenceState::Failed);
                        return;
                    }
                }
            }
        }
        set_state(SequenceState::Completed);
        info!("sequence completed");
    }

    /// Pause at the next frame boundary; the frame in progress finishes.
    pub async fn pause_sequence_exposure(&self) -> GateResult<Envelope> {
        if !self.sequence_active() {
            return Ok(Envelope::warning("no running sequence"));
        }
        if let Some(control) = self.sequence_control() {
            let _ = control.send(SequenceCommand::Pause);
        }
        Ok(Envelope::success("sequence pausing at next frame"))
    }

    pub async fn continue_sequence_exposure(&self) -> GateResult<Envelope> {
        if !self.sequence_active() {
            return Ok(Envelope::warning("no running sequence"));
        }
        if let Some(control) = self.sequence_control() {
            let _ = control.send(SequenceCommand::Run);
        }
        Ok(Envelope::success("sequence resumed"))
    }

    /// Abort the current frame and discard the remaining plan.
    pub async fn abort_sequence_exposure(&self) -> GateResult<Envelope> {
        if !self.sequence_active() {
            return Ok(Envelope::warning("no running sequence"));
        }
        if let Some(control) = self.sequence_control() {
            let _ = control.send(SequenceCommand::Abort);
        }
        Ok(Envelope::success("sequence aborted"))
    }

    pub async fn get_sequence_status(&self) -> GateResult<Envelope> {
        let status = self
            .sequence
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|h| h.status.lock().map(|st| st.clone()).ok()))
            .flatten();
        match status {
            Some(status) => Ok(Envelope::success("sequence status")
                .with("sequence", serde_json::to_value(&status)?)),
            None => Ok(Envelope::warning("no sequence started")),
        }
    }
}

/// Wait out a pause, reporting the command that ended it.
async fn hold_while_paused(
    control: &mut watch::Receiver<SequenceCommand>,
    status: &Arc<Mutex<SequenceStatus>>,
) -> SequenceCommand {
    let current = *control.borrow();
    if current == SequenceCommand::Pause {
        if let Ok(mut st) = status.lock() {
            st.state = SequenceState::Paused;
        }
        match control.wait_for(|c| *c != SequenceCommand::Pause).await {
            Ok(command) => {
                let command = *command;
                if command == SequenceCommand::Run {
                    if let Ok(mut st) = status.lock() {
                        st.state = SequenceState::Running;
                    }
                }
                command
            }
            Err(_) => SequenceCommand::Abort,
        }
    } else {
        current
    }
}

fn missing_mandatory(
    snapshot: &crate::session::DeviceSnapshot,
    frame: &FrameSpec,
) -> Option<&'static str> {
    if snapshot.capability("can_gain") && frame.gain.is_none() {
        return Some("gain");
    }
    if snapshot.capability("can_offset") && frame.offset.is_none() {
        return Some("offset");
    }
    None
}

/// Resolve one optional camera parameter against its capability flag and
/// device-reported range, substituting the default with a recorded warning.
#[allow(clippy::too_many_arguments)]
fn settle_parameter(
    snapshot: &crate::session::DeviceSnapshot,
    flag: &str,
    name: &str,
    supplied: Option<f64>,
    default: f64,
    min_key: &str,
    max_key: &str,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    if !snapshot.capability(flag) {
        return None;
    }
    let min = snapshot.number(min_key).unwrap_or(f64::MIN);
    let max = snapshot.number(max_key).unwrap_or(f64::MAX);
    match supplied {
        Some(value) if value >= min && value <= max => Some(value),
        Some(value) => {
            warnings.push(format!(
                "{name} {value} outside [{min}, {max}], using {default}"
            ));
            Some(default)
        }
        None => {
            warnings.push(format!("{name} not supplied, using {default}"));
            Some(default)
        }
    }
}

fn settle_binning(
    snapshot: &crate::session::DeviceSnapshot,
    supplied: Option<f64>,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    if !snapshot.capability("can_binning") {
        return None;
    }
    let max = snapshot.number("max_binning").unwrap_or(1.0);
    match supplied {
        Some(value) if value >= 1.0 && value <= max => Some(value),
        Some(value) => {
            warnings.push(format!(
                "binning {value} outside [1, {max}], using {DEFAULT_BINNING}"
            ));
            Some(DEFAULT_BINNING)
        }
        None => {
            warnings.push(format!("binning not supplied, using {DEFAULT_BINNING}"));
            Some(DEFAULT_BINNING)
        }
    }
}
