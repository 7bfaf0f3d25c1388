//! Push channel protocol.
//!
//! Wire behavior of the persistent notification channel. The connection
//! manager is generic over [`PushProtocol`]; [`HubProtocol`] is the JSON
//! hub dialect spoken by the console backend. Every subscribed channel
//! funnels into the same normalization path once routed, so adding a new
//! server event is a one-line change to the channel table.

use std::time::Duration;

use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;
use uuid::Uuid;

use crate::error::{NotifyError, Result};

/// Server event channels the engine subscribes to. The first entry is the
/// generic catch-all; the rest are type-specific streams.
pub const EVENT_CHANNELS: &[&str] = &[
    "ReceiveNotification",
    "ReceiveAccountSignup",
    "ReceiveCertificationRequest",
    "ReceiveAuctionRequest",
    "ReceiveWithdrawRequest",
    "ReceiveDisputeOpened",
    "ReceiveWalletTransfer",
];

/// One decoded server event: the channel it arrived on and its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    pub channel: String,
    pub payload: Value,
}

/// Wire behavior of a push endpoint.
pub trait PushProtocol: Send + Sync + 'static {
    /// Channels this protocol routes into normalization.
    fn event_channels(&self) -> &[&str];

    /// Endpoint URL carrying the access token.
    fn endpoint_url(&self, token: &str) -> Result<String>;

    /// Frames sent immediately after the socket opens.
    fn handshake_messages(&self) -> Vec<Message>;

    /// Frame that joins a logical group, when the server supports groups.
    fn join_group_message(&self, group: &str) -> Option<Message>;

    /// Keep-alive frame. `None` disables the heartbeat timer.
    fn heartbeat_message(&self) -> Option<Message>;

    /// Keep-alive cadence.
    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    /// Decode one transport message into zero or more event frames.
    fn decode_frame(&self, message: &Message) -> Result<Vec<PushFrame>>;
}

/// JSON hub dialect of the console backend.
///
/// Client frames: `{"type":"hello",...}`, `{"type":"join",...}` and
/// `{"type":"ping"}`. Server frames carrying `{"type":"event"}` are routed;
/// everything else (pongs, acks) is ignored.
#[derive(Debug, Clone)]
pub struct HubProtocol {
    endpoint: String,
    heartbeat_interval: Duration,
    client_id: Uuid,
}

impl HubProtocol {
    pub fn new(endpoint: impl Into<String>, heartbeat_interval_ms: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            client_id: Uuid::new_v4(),
        }
    }
}

impl PushProtocol for HubProtocol {
    fn event_channels(&self) -> &[&str] {
        EVENT_CHANNELS
    }

    fn endpoint_url(&self, token: &str) -> Result<String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| NotifyError::transport(format!("Invalid push endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("access_token", token);
        Ok(url.to_string())
    }

    fn handshake_messages(&self) -> Vec<Message> {
        let hello = json!({
            "type": "hello",
            "clientId": self.client_id,
            "channels": EVENT_CHANNELS,
        });
        vec![Message::Text(hello.to_string().into())]
    }

    fn join_group_message(&self, group: &str) -> Option<Message> {
        let join = json!({"type": "join", "group": group});
        Some(Message::Text(join.to_string().into()))
    }

    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Text(json!({"type": "ping"}).to_string().into()))
    }

    fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    fn decode_frame(&self, message: &Message) -> Result<Vec<PushFrame>> {
        let text = match message {
            Message::Text(text) => text.as_str(),
            _ => return Ok(vec![]),
        };

        let value: Value = serde_json::from_str(text)
            .map_err(|e| NotifyError::transport(format!("Malformed hub frame: {e}")))?;

        if value.get("type").and_then(Value::as_str) != Some("event") {
            return Ok(vec![]);
        }
        let Some(channel) = value.get("channel").and_then(Value::as_str) else {
            return Ok(vec![]);
        };
        if !self.event_channels().iter().any(|c| *c == channel) {
            return Ok(vec![]);
        }

        let payload = unwrap_payload(value.get("payload").cloned().unwrap_or(Value::Null));
        Ok(vec![PushFrame {
            channel: channel.to_string(),
            payload,
        }])
    }
}

/// Some backend paths double-encode the event payload as a JSON string.
fn unwrap_payload(payload: Value) -> Value {
    match payload {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}
