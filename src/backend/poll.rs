//! Poll-style protocol adapter.
//!
//! The poll backend is a synchronous request/response protocol: every read
//! or write is one blocking round-trip to the remote driver, and state
//! changes are only visible by re-reading. The wire client lives behind
//! [`PollTransport`]; this adapter offloads each call with `spawn_blocking`
//! so a slow driver never stalls the cooperative scheduler, and implements
//! `wait_until` as a sampling loop with a fixed sleep between reads.
//!
//! Every poll session owns an independent transport; nothing is shared
//! across sessions on this path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::backend::{DeviceChannel, DiscoveredDevice, FrameBlob, Signal, WaitOutcome};
use crate::error::{GateError, GateResult};

/// Status property sampled for [`Signal::ImageReady`].
const PROP_IMAGE_READY: &str = "image_ready";
/// Status property sampled for [`Signal::Settled`].
const PROP_SETTLED: &str = "settled";
/// Fault flag checked on every sampling cycle.
const PROP_FAULT: &str = "fault";
const PROP_FAULT_MESSAGE: &str = "fault_message";

/// Blocking wire client for the poll protocol.
///
/// Implementations perform one remote round-trip per call and may block the
/// calling thread. The adapter never invokes these on the async runtime
/// directly.
pub trait PollTransport: Send + Sync {
    fn connect(&self) -> GateResult<()>;
    fn disconnect(&self) -> GateResult<()>;
    fn has_property(&self, name: &str) -> GateResult<bool>;
    fn get_number(&self, name: &str) -> GateResult<f64>;
    fn put_number(&self, name: &str, value: f64) -> GateResult<()>;
    fn get_switch(&self, name: &str) -> GateResult<bool>;
    fn put_switch(&self, name: &str, on: bool) -> GateResult<()>;
    fn get_text(&self, name: &str) -> GateResult<String>;
    fn discover(&self) -> GateResult<Vec<DiscoveredDevice>>;
    fn start_exposure(&self, seconds: f64, dark: bool) -> GateResult<()>;
    fn stop_exposure(&self) -> GateResult<()>;
    fn get_frame(&self) -> GateResult<FrameBlob>;
}

/// [`DeviceChannel`] over one blocking poll transport.
pub struct PollChannel {
    transport: Arc<dyn PollTransport>,
    /// Sleep between samples inside `wait_until`.
    interval: Duration,
}

impl PollChannel {
    pub fn new(transport: Arc<dyn PollTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    /// Run one blocking transport call off the async scheduler.
    async fn blocking<T, F>(&self, call: F) -> GateResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PollTransport) -> GateResult<T> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || call(transport.as_ref()))
            .await
            .map_err(|e| GateError::Driver(format!("backend worker failed: {e}")))?
    }

    fn signal_property(signal: Signal) -> &'static str {
        match signal {
            Signal::ImageReady => PROP_IMAGE_READY,
            Signal::Settled => PROP_SETTLED,
        }
    }
}

#[async_trait]
impl DeviceChannel for PollChannel {
    async fn open(&self) -> GateResult<()> {
        self.blocking(|t| t.connect()).await
    }

    async fn close(&self) -> GateResult<()> {
        self.blocking(|t| t.disconnect()).await
    }

    async fn has_property(&self, name: &str) -> GateResult<bool> {
        let name = name.to_string();
        self.blocking(move |t| t.has_property(&name)).await
    }

    async fn read_number(&self, name: &str) -> GateResult<f64> {
        let name = name.to_string();
        self.blocking(move |t| t.get_number(&name)).await
    }

    async fn write_number(&self, name: &str, value: f64) -> GateResult<()> {
        let name = name.to_string();
        self.blocking(move |t| t.put_number(&name, value)).await
    }

    async fn read_switch(&self, name: &str) -> GateResult<bool> {
        let name = name.to_string();
        self.blocking(move |t| t.get_switch(&name)).await
    }

    async fn write_switch(&self, name: &str, on: bool) -> GateResult<()> {
        let name = name.to_string();
        self.blocking(move |t| t.put_switch(&name, on)).await
    }

    async fn read_text(&self, name: &str) -> GateResult<String> {
        let name = name.to_string();
        self.blocking(move |t| t.get_text(&name)).await
    }

    async fn discover(&self) -> GateResult<Vec<DiscoveredDevice>> {
        self.blocking(|t| t.discover()).await
    }

    /// Sample the status property until it reads true, the fault flag trips,
    /// or the deadline passes.
    async fn wait_until(&self, signal: Signal, timeout: Duration) -> GateResult<WaitOutcome> {
        let property = Self::signal_property(signal);
        let deadline = Instant::now() + timeout;
        loop {
            if self.read_switch(PROP_FAULT).await.unwrap_or(false) {
                let reason = self
                    .read_text(PROP_FAULT_MESSAGE)
                    .await
                    .unwrap_or_else(|_| "hardware fault".to_string());
                return Ok(WaitOutcome::Faulted(reason));
            }
            if self.read_switch(property).await? {
                return Ok(WaitOutcome::Satisfied);
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            sleep(self.interval.min(deadline - Instant::now())).await;
        }
    }

    async fn begin_exposure(&self, seconds: f64, dark: bool) -> GateResult<()> {
        self.blocking(move |t| t.start_exposure(seconds, dark)).await
    }

    async fn halt_exposure(&self) -> GateResult<()> {
        self.blocking(|t| t.stop_exposure()).await
    }

    async fn read_frame(&self) -> GateResult<FrameBlob> {
        self.blocking(|t| t.get_frame()).await
    }
}
