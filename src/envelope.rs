//! The uniform reply contract.
//!
//! Every operation answers with an [`Envelope`]: a status code, a human
//! readable message and a JSON parameter object. Unsolicited messages (the
//! exposure completion signal) reuse the same shape wrapped in an
//! [`Outbound`] frame whose `type` field distinguishes them from direct
//! replies.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::GateError;

/// Reply status. Serialized as an integer on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Error => 1,
            Status::Warning => 2,
        }
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Status::Success),
            1 => Ok(Status::Error),
            2 => Ok(Status::Warning),
            other => Err(serde::de::Error::custom(format!(
                "unknown status code {other}"
            ))),
        }
    }
}

/// The three-field reply contract: `{status, message, params}`.
///
/// `params` is always an object, never null.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Status,
    pub message: String,
    pub params: Map<String, Value>,
}

impl Envelope {
    pub fn new(status: Status, message: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            status,
            message: message.into(),
            params,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Status::Success, message, Map::new())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Status::Warning, message, Map::new())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message, Map::new())
    }

    /// Attach one parameter, consuming and returning the envelope.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl From<&GateError> for Envelope {
    /// Fold an error into the reply contract, surfacing the cause in
    /// `params.error`.
    fn from(err: &GateError) -> Self {
        Envelope::new(err.status(), err.to_string(), Map::new())
            .with("error", json!(err.to_string()))
    }
}

impl From<GateError> for Envelope {
    fn from(err: GateError) -> Self {
        Envelope::from(&err)
    }
}

/// Wire frame sent to the client: a reply to a request, or an unsolicited
/// signal (exposure completion / timeout).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    #[serde(flatten)]
    pub envelope: Envelope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Reply,
    Signal,
}

impl Outbound {
    pub fn reply(envelope: Envelope) -> Self {
        Self {
            kind: OutboundKind::Reply,
            envelope,
        }
    }

    pub fn signal(envelope: Envelope) -> Self {
        Self {
            kind: OutboundKind::Signal,
            envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_integer() {
        let env = Envelope::success("connected").with("info", json!({"name": "CCD Simulator"}));
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["status"], json!(0));
        assert_eq!(wire["message"], json!("connected"));
        assert_eq!(wire["params"]["info"]["name"], json!("CCD Simulator"));

        let warn = Envelope::warning("already connected");
        assert_eq!(serde_json::to_value(&warn).unwrap()["status"], json!(2));
    }

    #[test]
    fn params_never_null() {
        let wire = serde_json::to_value(Envelope::error("boom")).unwrap();
        assert!(wire["params"].is_object());
    }

    #[test]
    fn error_fold_carries_cause() {
        let env: Envelope = GateError::Network("connection refused".into()).into();
        assert_eq!(env.status, Status::Error);
        assert_eq!(
            env.params["error"],
            json!("network error: connection refused")
        );
    }

    #[test]
    fn signal_frame_is_tagged() {
        let frame = Outbound::signal(Envelope::success("exposure finished"));
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["type"], json!("signal"));
        assert_eq!(wire["status"], json!(0));
    }

    #[test]
    fn round_trips() {
        let frame = Outbound::reply(Envelope::warning("not exposing"));
        let text = serde_json::to_string(&frame).unwrap();
        let back: Outbound = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, OutboundKind::Reply);
        assert_eq!(back.envelope.status, Status::Warning);
    }
}
