//! Flavor-dispatching channel factory.
//!
//! Bridges connect-time addresses to the matching protocol adapter: a poll
//! address gets its own blocking transport wrapped in a [`PollChannel`], a
//! push address shares the process-wide [`PushClient`]. The wire ends are
//! injected, so a deployment supplies the actual protocol clients and tests
//! supply stubs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::poll::{PollChannel, PollTransport};
use crate::backend::push::{PushChannel, PushClient};
use crate::backend::{Address, BackendFlavor, ChannelFactory, DeviceChannel, DeviceKind};
use crate::error::{GateError, GateResult};

/// Builds one blocking poll transport per connect-time address.
///
/// Poll sessions never share a wire connection; the bridge asks for a fresh
/// transport on every open.
pub trait PollConnector: Send + Sync {
    fn connect(&self, address: &Address) -> GateResult<Arc<dyn PollTransport>>;
}

pub struct BridgeFactory {
    connector: Arc<dyn PollConnector>,
    push: Arc<PushClient>,
    poll_interval: Duration,
}

impl BridgeFactory {
    pub fn new(
        connector: Arc<dyn PollConnector>,
        push: Arc<PushClient>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connector,
            push,
            poll_interval,
        }
    }
}

#[async_trait]
impl ChannelFactory for BridgeFactory {
    async fn open_channel(
        &self,
        _kind: DeviceKind,
        address: &Address,
    ) -> GateResult<Arc<dyn DeviceChannel>> {
        match address.flavor {
            BackendFlavor::Poll => {
                let transport = self.connector.connect(address)?;
                Ok(Arc::new(PollChannel::new(transport, self.poll_interval)))
            }
            BackendFlavor::Push => {
                let device = address.device_name.clone().ok_or_else(|| {
                    GateError::InvalidValue(
                        "device name required for push backend".to_string(),
                    )
                })?;
                Ok(Arc::new(PushChannel::new(Arc::clone(&self.push), device)))
            }
        }
    }
}
