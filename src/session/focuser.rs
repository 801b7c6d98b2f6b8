//! Focuser session: absolute and relative moves over the generic lifecycle.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};
use crate::session::{await_settled, Session};

const MOVE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct FocuserSession {
    session: Session,
}

impl FocuserSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn base(&self) -> &Session {
        &self.session
    }

    /// Move to an absolute position and wait for the motor to settle.
    pub async fn move_to(&self, position: f64) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        let max = snapshot.number("max_position").unwrap_or(f64::MAX);
        if !(0.0..=max).contains(&position) {
            return Err(GateError::InvalidValue(format!(
                "position {position} outside [0, {max}]"
            )));
        }
        let channel = self.session.channel()?;
        info!(position, "focuser moving");
        channel.write_number("position", position).await?;
        await_settled(&channel, MOVE_TIMEOUT).await?;
        Ok(Envelope::success("focuser move finished").with("position", json!(position)))
    }

    /// Move by a signed step count relative to the current position.
    pub async fn move_relative(&self, steps: f64) -> GateResult<Envelope> {
        let channel = self.session.channel()?;
        let current = channel.read_number("position").await?;
        self.move_to(current + steps).await
    }

    pub async fn abort_move(&self) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_abort") {
            return Err(GateError::NotSupported("move abort".to_string()));
        }
        let channel = self.session.channel()?;
        channel.write_switch("abort_motion", true).await?;
        Ok(Envelope::success("focuser move aborted"))
    }

    pub async fn get_temperature(&self) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_temperature") {
            return Err(GateError::NotSupported("temperature probe".to_string()));
        }
        let channel = self.session.channel()?;
        let temperature = channel.read_number("temperature").await?;
        Ok(Envelope::success("focuser temperature").with("temperature", json!(temperature)))
    }
}
