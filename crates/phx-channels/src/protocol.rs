//! Wire envelope codec and reserved protocol names.
//!
//! Every frame is a single JSON object:
//!
//! ```text
//! { "topic": string, "event": string, "payload": any, "ref": integer | null }
//! ```
//!
//! A `null` (or missing) ref marks an unsolicited broadcast. Replies carry
//! `event = "phx_reply"` and a payload of shape `{status, response}`.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use crate::{
    error::PhxResult,
    types::{Ref, Topic},
};

/// Topic reserved for socket-level traffic.
pub const PHOENIX_TOPIC: &str = "phoenix";
/// Keep-alive event sent on [`PHOENIX_TOPIC`].
pub const HEARTBEAT_EVENT: &str = "heartbeat";
/// Join request.
pub const PHX_JOIN: &str = "phx_join";
/// Leave request.
pub const PHX_LEAVE: &str = "phx_leave";
/// Reply to a push.
pub const PHX_REPLY: &str = "phx_reply";
/// Channel or socket error.
pub const PHX_ERROR: &str = "phx_error";
/// Channel closed.
pub const PHX_CLOSE: &str = "phx_close";

const REPLY_EVENT_PREFIX: &str = "chan_reply_";

/// Per-ref event name a push listens on for its reply, e.g. `chan_reply_3`.
pub fn reply_event_name(reference: Ref) -> String {
    format!("{REPLY_EVENT_PREFIX}{reference}")
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the frame belongs to.
    pub topic: Topic,
    /// Event name within the topic.
    pub event: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
    /// Correlation ref; `None` for unsolicited frames.
    #[serde(rename = "ref", default, deserialize_with = "deserialize_ref")]
    pub reference: Option<Ref>,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(
        topic: impl Into<Topic>,
        event: impl Into<String>,
        payload: Value,
        reference: Option<Ref>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference,
        }
    }

    /// Keep-alive frame: topic `phoenix`, event `heartbeat`, empty payload.
    pub fn heartbeat(reference: Ref) -> Self {
        Self::new(
            PHOENIX_TOPIC,
            HEARTBEAT_EVENT,
            Value::Object(serde_json::Map::new()),
            Some(reference),
        )
    }

    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> PhxResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> PhxResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns true if this frame is a reply to a push.
    pub fn is_reply(&self) -> bool {
        self.event == PHX_REPLY
    }
}

/// Status and response carried by a reply payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Reply status, usually `ok` or `error`.
    pub status: String,
    /// Response body.
    #[serde(default)]
    pub response: Value,
}

impl Reply {
    /// Extract the reply from a `{status, response}` payload.
    ///
    /// Returns `None` when the payload carries no string `status`.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let status = payload.get("status")?.as_str()?.to_string();
        let response = payload.get("response").cloned().unwrap_or(Value::Null);
        Some(Self { status, response })
    }

    /// Reply recorded for a push that timed out.
    pub fn timeout() -> Self {
        Self {
            status: "timeout".to_string(),
            response: Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireRef {
    Number(u64),
    Text(String),
}

fn deserialize_ref<'de, D>(deserializer: D) -> Result<Option<Ref>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<WireRef>::deserialize(deserializer)? {
        None => Ok(None),
        Some(WireRef::Number(n)) => Ok(Some(Ref(n))),
        Some(WireRef::Text(s)) => s
            .parse::<u64>()
            .map(|n| Some(Ref(n)))
            .map_err(|_| de::Error::custom(format!("ref is not an integer: {s:?}"))),
    }
}
