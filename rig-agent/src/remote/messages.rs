//! Wire message types for the backend channel.
//!
//! Everything on the wire is a JSON text frame. Outbound traffic is
//! expressed as [`OutboundCommand`] batches so a login pair is never
//! interleaved with another send; inbound frames stay raw strings until a
//! dispatcher parses them.

use serde::Serialize;
use serde_json::{Value, json};

use super::error::RpcError;

/// Protocol revision carried in every login.
pub const PROTOCOL_VERSION: u32 = 3;

/// Method identifier of outbound status notifications.
pub const STATUS_METHOD: &str = "miner.status";

/// First frame of every session.
#[derive(Debug, Clone, Serialize)]
pub struct LoginMessage {
    pub version: String,
    pub protocol: u32,
    pub rig: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Status notification envelope. `param[0]` is the rig status string,
/// `param[1]` the device rows.
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub method: &'static str,
    pub param: Vec<Value>,
}

/// One command in an outbound batch.
///
/// A batch is drained whole before the next one starts, preserving
/// intra-batch order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Close the transport with the given reason and request an immediate
    /// session restart (no reconnect backoff).
    Close(String),
    /// Send a serialized frame.
    Send(String),
    /// Send a serialized status frame and record the send time for the
    /// heartbeat scheduler.
    SendStatus(String),
}

pub type OutboundBatch = Vec<OutboundCommand>;

/// Reply envelope for one RPC. `error` is null on success, the numeric
/// code otherwise; `result` carries the payload on success and the error
/// message on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCall {
    pub id: i64,
    pub code: i64,
    pub result: Option<String>,
}

impl ExecutedCall {
    pub fn success(id: i64, result: Option<String>) -> Self {
        Self {
            id,
            code: 0,
            result,
        }
    }

    pub fn failure(id: i64, error: &RpcError) -> Self {
        Self {
            id,
            code: error.code.as_i64(),
            result: Some(error.message.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn to_json(&self) -> String {
        let error = if self.code == 0 {
            Value::Null
        } else {
            Value::from(self.code)
        };
        let result = match &self.result {
            Some(text) => Value::from(text.as_str()),
            None => Value::Null,
        };
        json!({ "id": self.id, "error": error, "result": result }).to_string()
    }
}

/// Extract the method name of an inbound frame, if it has one.
pub fn method_of(frame: &str) -> Option<String> {
    let value: Value = serde_json::from_str(frame).ok()?;
    value.get("method")?.as_str().map(str::to_owned)
}

/// RPC correlation id, defaulting to −1 when absent or malformed.
pub fn rpc_id_of(value: &Value) -> i64 {
    value.get("id").and_then(Value::as_i64).unwrap_or(-1)
}
