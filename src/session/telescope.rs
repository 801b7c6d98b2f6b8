//! Telescope session: slewing, parking and tracking over the generic
//! lifecycle. Slew completion reuses the settled-motion wait.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};
use crate::session::{await_settled, Session};

/// Budget for a full slew.
const GOTO_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, Deserialize)]
pub struct GotoSpec {
    /// Right ascension, hours.
    pub ra: f64,
    /// Declination, degrees.
    pub dec: f64,
}

pub struct TelescopeSession {
    session: Session,
}

impl TelescopeSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn base(&self) -> &Session {
        &self.session
    }

    /// Slew to the target and wait until the mount settles.
    pub async fn goto(&self, spec: GotoSpec) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !(0.0..24.0).contains(&spec.ra) {
            return Err(GateError::InvalidValue(format!(
                "right ascension {} outside [0, 24)",
                spec.ra
            )));
        }
        if !(-90.0..=90.0).contains(&spec.dec) {
            return Err(GateError::InvalidValue(format!(
                "declination {} outside [-90, 90]",
                spec.dec
            )));
        }
        let channel = self.session.channel()?;
        if snapshot.capability("can_park") && channel.read_switch("parked").await? {
            return Err(GateError::InvalidOperation(
                "telescope is parked".to_string(),
            ));
        }
        info!(ra = spec.ra, dec = spec.dec, "slewing");
        channel.write_number("target_ra", spec.ra).await?;
        channel.write_number("target_dec", spec.dec).await?;
        await_settled(&channel, GOTO_TIMEOUT).await?;
        Ok(Envelope::success("slew finished")
            .with("ra", json!(spec.ra))
            .with("dec", json!(spec.dec)))
    }

    /// Stop an in-flight slew.
    pub async fn abort_goto(&self) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_abort") {
            return Err(GateError::NotSupported("slew abort".to_string()));
        }
        let channel = self.session.channel()?;
        channel.write_switch("abort_motion", true).await?;
        Ok(Envelope::success("slew aborted"))
    }

    pub async fn park(&self) -> GateResult<Envelope> {
        self.set_parked(true).await
    }

    pub async fn unpark(&self) -> GateResult<Envelope> {
        self.set_parked(false).await
    }

    async fn set_parked(&self, parked: bool) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_park") {
            return Err(GateError::NotSupported("parking".to_string()));
        }
        let channel = self.session.channel()?;
        if channel.read_switch("parked").await? == parked {
            return Ok(Envelope::warning(if parked {
                "telescope already parked"
            } else {
                "telescope not parked"
            }));
        }
        channel.write_switch("parked", parked).await?;
        Ok(Envelope::success(if parked {
            "telescope parked"
        } else {
            "telescope unparked"
        }))
    }

    pub async fn set_tracking(&self, on: bool) -> GateResult<Envelope> {
        let snapshot = self.session.snapshot().ok_or(GateError::NotConnected)?;
        if !snapshot.capability("can_track") {
            return Err(GateError::NotSupported("tracking control".to_string()));
        }
        let channel = self.session.channel()?;
        channel.write_switch("tracking", on).await?;
        Ok(Envelope::success(if on {
            "tracking on"
        } else {
            "tracking off"
        }))
    }

    /// Current pointing, read fresh from the mount.
    pub async fn get_position(&self) -> GateResult<Envelope> {
        let channel = self.session.channel()?;
        let ra = channel.read_number("ra").await?;
        let dec = channel.read_number("dec").await?;
        Ok(Envelope::success("telescope position")
            .with("ra", json!(ra))
            .with("dec", json!(dec)))
    }
}
