//! RPC envelopes exchanged over the WebSocket
//!
//! Requests look like
//! `{"RequestId": 1, "Type": "Deployer", "Request": "Import", "Params": {...}}`
//! and responses like `{"RequestId": 1, "Response": {...}, "Error": "..."}`,
//! the error being present only on failure.

use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Channel carrying responses to the connection writer
pub type ResponseSender = mpsc::UnboundedSender<Value>;

/// Whether the message is a request of the given type for one of the given operations
pub fn is_request(message: &Value, kind: &str, operations: &[&str]) -> bool {
    message.get("RequestId").is_some()
        && message.get("Type").and_then(Value::as_str) == Some(kind)
        && message
            .get("Request")
            .and_then(Value::as_str)
            .is_some_and(|operation| operations.contains(&operation))
}

pub fn request_id(message: &Value) -> Value {
    message.get("RequestId").cloned().unwrap_or(Value::Null)
}

/// Request parameters, an empty object if missing
pub fn params(message: &Value) -> Value {
    message.get("Params").cloned().unwrap_or_else(|| json!({}))
}

/// Build a response envelope from the result of an operation
pub fn response(request_id: Value, result: Result<Value, String>) -> Value {
    match result {
        Ok(info) => json!({"RequestId": request_id, "Response": info}),
        Err(error) => json!({"RequestId": request_id, "Response": {}, "Error": error}),
    }
}
