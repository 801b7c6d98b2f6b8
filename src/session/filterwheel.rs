//! Filter wheel session: slot selection over the generic lifecycle.
//!
//! Slots are 1-based. Filter names come from the connect-time snapshot;
//! wheels that do not publish names answer with slot numbers only.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};
use crate::session::{await_settled, Session};

const ROTATE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FilterWheelSession {
    session: Session,
}

impl FilterWheelSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn base(&self) -> &Session {
        &self.session
    }

    /// Rotate to `slot` and wait until the wheel settles.
    pub async fn set_filter(&self, slot: u32) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        let count = snapshot.number("filter_count").unwrap_or(0.0) as u32;
        if slot == 0 || slot > count {
            return Err(GateError::InvalidValue(format!(
                "filter slot {slot} outside [1, {count}]"
            )));
        }
        let channel = self.session.channel()?;
        info!(slot, "filter wheel rotating");
        channel.write_number("target_filter", f64::from(slot)).await?;
        await_settled(&channel, ROTATE_TIMEOUT).await?;
        Ok(Envelope::success("filter selected")
            .with("filter", json!(slot))
            .with("name", json!(self.filter_name(slot))))
    }

    pub async fn get_filter(&self) -> GateResult<Envelope> {
        let channel = self.session.channel()?;
        let slot = channel.read_number("target_filter").await? as u32;
        Ok(Envelope::success("current filter")
            .with("filter", json!(slot))
            .with("name", json!(self.filter_name(slot))))
    }

    /// All filter names published by the wheel, in slot order.
    pub async fn get_filters_list(&self) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        let names = snapshot
            .texts
            .get("filter_names")
            .map(|raw| {
                raw.split(',')
                    .map(|n| n.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Envelope::success("filter list").with("filters", json!(names)))
    }

    fn filter_name(&self, slot: u32) -> Option<String> {
        let snapshot = self.session.snapshot()?;
        let names = snapshot.texts.get("filter_names")?;
        names
            .split(',')
            .nth(slot.saturating_sub(1) as usize)
            .map(|n| n.trim().to_string())
    }
}
