use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EXECUTION_UPDATE: &str = "execution_update";
pub const SCREENSHOT_FRAME: &str = "screenshot_frame";
pub const BATCH: &str = "batch";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const KEEPALIVE: &str = "keepalive";

/// Event types that are valid on the wire but carry nothing to apply.
pub const NO_OP_TYPES: [&str; 3] = [PING, PONG, KEEPALIVE];

/// Progress of one execution as reported by the backend.
///
/// Everything except `execution_id` is opaque and kept in `fields`, so a
/// status-only update and a step-result update both fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub execution_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ExecutionUpdate {
    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotFrame {
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub frame: Value,
}

/// Client heartbeat frame.
pub fn ping_frame() -> String {
    serde_json::json!({ "type": PING }).to_string()
}
