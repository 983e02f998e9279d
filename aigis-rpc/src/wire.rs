//! Line-delimited JSON wire format shared by every peer in this crate.
//!
//! Each line on the wire is exactly one JSON object:
//!
//! - notification: `{"method": ..., "params": ...}`
//! - request:      `{"id": N, "method": ..., "params": ...}`
//! - response:     `{"id": N, "result": ...}` or `{"id": N, "error": {...}}`

use serde_json::{Map, Value};

use crate::error::{ReadError, RemoteError};

/// A raw, not-yet-dispatched call parsed off the wire: either a notification
/// or a request, distinguished by the presence of `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

pub(crate) enum WireMessage {
    Call(RpcCall),
    Response { id: u64, result: Result<Value, RemoteError> },
}

pub(crate) fn parse_message(raw: &str) -> Result<WireMessage, ReadError> {
    let value: Value = serde_json::from_str(raw).map_err(ReadError::Json)?;
    let obj = value.as_object().ok_or_else(|| ReadError::UnknownRequest(value.clone()))?;

    if obj.contains_key("method") {
        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| ReadError::UnknownRequest(value.clone()))?
            .to_owned();
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let id = obj.get("id").and_then(Value::as_u64);
        return Ok(WireMessage::Call(RpcCall { id, method, params }));
    }

    let id = obj
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ReadError::UnknownRequest(value.clone()))?;

    if let Some(err) = obj.get("error") {
        return Ok(WireMessage::Response { id, result: Err(parse_remote_error(err)) });
    }
    let result = obj.get("result").cloned().unwrap_or(Value::Null);
    Ok(WireMessage::Response { id, result: Ok(result) })
}

fn parse_remote_error(v: &Value) -> RemoteError {
    let code = v.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let message = v.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_owned();
    let data = v.get("data").cloned();
    RemoteError::Custom { code, message, data }
}

pub(crate) fn encode_notification(method: &str, params: &Value) -> Value {
    serde_json::json!({ "method": method, "params": params })
}

pub(crate) fn encode_request(id: u64, method: &str, params: &Value) -> Value {
    serde_json::json!({ "id": id, "method": method, "params": params })
}

pub(crate) fn encode_response(id: u64, result: &Result<Value, RemoteError>) -> Value {
    match result {
        Ok(v) => serde_json::json!({ "id": id, "result": v }),
        Err(RemoteError::InvalidRequest(data)) => {
            serde_json::json!({ "id": id, "error": { "code": -32600, "message": "invalid request", "data": data } })
        }
        Err(RemoteError::Custom { code, message, data }) => {
            serde_json::json!({ "id": id, "error": { "code": code, "message": message, "data": data } })
        }
    }
}

/// Convenience accessor for handlers that want to read a param object
/// without a typed struct.
pub fn dict_get_u64(dict: &Map<String, Value>, key: &str) -> Option<u64> {
    dict.get(key).and_then(Value::as_u64)
}

pub fn dict_get_string<'a>(dict: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(Value::as_str)
}
