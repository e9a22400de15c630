//! Inbound response envelopes and reply decoding.

use serde_json::Value;

use crate::error::DispatchError;

/// A parsed `/ls_resp` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub request_id: Option<u64>,
    /// Raw `payload` field: usually a JSON string, sometimes already an object.
    pub payload: Value,
}

impl ResponseEnvelope {
    pub fn parse(bytes: &[u8]) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DispatchError::Protocol(format!("envelope is not JSON: {e}")))?;
        let Value::Object(mut fields) = value else {
            return Err(DispatchError::Protocol("envelope is not an object".to_string()));
        };

        let request_id = fields.get("request_id").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        Ok(Self {
            request_id,
            payload: fields.remove("payload").unwrap_or(Value::Null),
        })
    }

    /// Decode the nested payload.
    pub fn decode_payload(&self) -> Result<Value, DispatchError> {
        match &self.payload {
            Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
                DispatchError::Protocol(format!("reply payload is not JSON: {e}"))
            }),
            other => Ok(other.clone()),
        }
    }
}

/// Server-side error carried in a decoded reply, if any.
pub fn payload_error(payload: &Value) -> Option<String> {
    let error = payload.get("error").filter(|v| !v.is_null())?;
    Some(match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Typed view of a decoded reply for the task types that return ids.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResponseData {
    SendMessage {
        thread_id: String,
        message_id: String,
        payload: Value,
    },
    Reaction {
        message_id: String,
    },
    Edit {
        message_id: String,
    },
}

const STEP_RESULT: &str = "/step/1/2/2/1";

impl TaskResponseData {
    /// Decode by task type; `None` for unknown types or unexpected shapes.
    pub fn decode(task_type: &str, payload: &Value) -> Option<Self> {
        let field = |idx: usize| {
            payload
                .pointer(&format!("{STEP_RESULT}/{idx}"))
                .and_then(scalar_text)
        };
        match task_type {
            "send_message_mqtt" => Some(Self::SendMessage {
                thread_id: field(2)?,
                message_id: field(3)?,
                payload: payload.pointer("/step/1/2")?.clone(),
            }),
            "set_message_reaction" => Some(Self::Reaction {
                message_id: field(4)?,
            }),
            "edit_message" => Some(Self::Edit {
                message_id: field(2)?,
            }),
            _ => None,
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
