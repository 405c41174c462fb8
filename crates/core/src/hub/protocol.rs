//! SignalR JSON hub protocol (version 1) framing and messages.

use serde_json::{json, Map, Value};

use crate::error::PayloadError;

/// Terminates every JSON record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u64 = 1;
const STREAM_ITEM: u64 = 2;
const COMPLETION: u64 = 3;
const STREAM_INVOCATION: u64 = 4;
const CANCEL_INVOCATION: u64 = 5;
const PING: u64 = 6;
const CLOSE: u64 = 7;

/// Handshake record sent right after the socket opens.
pub fn handshake_request() -> String {
    let mut frame = json!({ "protocol": "json", "version": 1 }).to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Validate the server's handshake reply (`{}` or `{"error": "..."}`).
pub fn parse_handshake_response(record: &str) -> Result<(), String> {
    let value: Value = serde_json::from_str(record).map_err(|err| err.to_string())?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(error.to_string()),
        None => Ok(()),
    }
}

/// Messages exchanged with the hub after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method on the other side. Without an id no completion is sent back.
    Invocation {
        /// Id the completion will carry.
        invocation_id: Option<String>,
        /// Method name.
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
    },
    /// Answer to an invocation that carried an id.
    Completion {
        /// Id of the invocation being answered.
        invocation_id: String,
        /// Return value on success.
        result: Option<Value>,
        /// Error text when the method failed.
        error: Option<String>,
    },
    /// Keep-alive from either side.
    Ping,
    /// Server is closing the connection.
    Close {
        /// Reason given by the server.
        error: Option<String>,
        /// Whether the server allows a reconnect.
        allow_reconnect: bool,
    },
    /// Streaming messages; the client never starts streams so these are ignored.
    Unsupported(u64),
}

impl HubMessage {
    /// Fire-and-forget invocation.
    pub fn send(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    /// Invocation that expects a completion.
    pub fn invoke(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        HubMessage::Invocation {
            invocation_id: Some(invocation_id.into()),
            target: target.into(),
            arguments,
        }
    }

    /// Encode as one record, separator included.
    pub fn encode(&self) -> String {
        let value = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut object = Map::new();
                object.insert("type".into(), json!(INVOCATION));
                if let Some(id) = invocation_id {
                    object.insert("invocationId".into(), json!(id));
                }
                object.insert("target".into(), json!(target));
                object.insert("arguments".into(), Value::Array(arguments.clone()));
                Value::Object(object)
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut object = Map::new();
                object.insert("type".into(), json!(COMPLETION));
                object.insert("invocationId".into(), json!(invocation_id));
                if let Some(error) = error {
                    object.insert("error".into(), json!(error));
                } else if let Some(result) = result {
                    object.insert("result".into(), result.clone());
                }
                Value::Object(object)
            }
            HubMessage::Ping => json!({ "type": PING }),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let mut object = Map::new();
                object.insert("type".into(), json!(CLOSE));
                if let Some(error) = error {
                    object.insert("error".into(), json!(error));
                }
                object.insert("allowReconnect".into(), json!(allow_reconnect));
                Value::Object(object)
            }
            HubMessage::Unsupported(kind) => json!({ "type": kind }),
        };
        let mut frame = value.to_string();
        frame.push(RECORD_SEPARATOR);
        frame
    }

    /// Decode one record (without separator).
    pub fn decode(record: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(PayloadError::MissingField("type"))?;

        match kind {
            INVOCATION => {
                let target = value
                    .get("target")
                    .and_then(Value::as_str)
                    .ok_or(PayloadError::MissingField("target"))?
                    .to_string();
                let arguments = match value.get("arguments") {
                    Some(Value::Array(arguments)) => arguments.clone(),
                    Some(_) => {
                        return Err(PayloadError::Invalid("arguments must be an array".into()))
                    }
                    None => Vec::new(),
                };
                Ok(HubMessage::Invocation {
                    invocation_id: string_field(&value, "invocationId"),
                    target,
                    arguments,
                })
            }
            COMPLETION => Ok(HubMessage::Completion {
                invocation_id: string_field(&value, "invocationId")
                    .ok_or(PayloadError::MissingField("invocationId"))?,
                result: value.get("result").cloned(),
                error: string_field(&value, "error"),
            }),
            PING => Ok(HubMessage::Ping),
            CLOSE => Ok(HubMessage::Close {
                error: string_field(&value, "error"),
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            STREAM_ITEM | STREAM_INVOCATION | CANCEL_INVOCATION => {
                Ok(HubMessage::Unsupported(kind))
            }
            other => Err(PayloadError::Invalid(format!("unknown message type {other}"))),
        }
    }
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Reassembles records that arrive split across, or packed into, websocket messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received text and return every record completed by it.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut records = Vec::new();
        while let Some(index) = self.pending.find(RECORD_SEPARATOR) {
            let record: String = self.pending.drain(..index).collect();
            self.pending.drain(..RECORD_SEPARATOR.len_utf8());
            if !record.trim().is_empty() {
                records.push(record);
            }
        }
        records
    }

    /// Bytes received that do not yet form a full record.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_splits_packed_and_partial_records() {
        let mut buffer = FrameBuffer::new();
        let first = HubMessage::Ping.encode();
        let second = HubMessage::send("TimetableUpdated", vec![json!({ "level": 1 })]).encode();
        let packed = format!("{first}{second}");
        let (head, tail) = packed.split_at(first.len() + 5);

        let records = buffer.push(head);
        assert_eq!(records, vec![r#"{"type":6}"#.to_string()]);
        assert!(!buffer.pending().is_empty());

        let records = buffer.push(tail);
        assert_eq!(records.len(), 1);
        assert!(buffer.pending().is_empty());
        assert_eq!(
            HubMessage::decode(&records[0]).expect("decodes"),
            HubMessage::send("TimetableUpdated", vec![json!({ "level": 1 })])
        );
    }

    #[test]
    fn invocation_without_id_omits_field() {
        let frame = HubMessage::send("KeepAlive", Vec::new()).encode();
        assert!(frame.ends_with(RECORD_SEPARATOR));
        assert!(!frame.contains("invocationId"));
        assert!(frame.contains(r#""target":"KeepAlive""#));
    }

    #[test]
    fn decodes_server_messages() {
        let completion =
            HubMessage::decode(r#"{"type":3,"invocationId":"7","error":"boom"}"#).expect("decodes");
        assert_eq!(
            completion,
            HubMessage::Completion {
                invocation_id: "7".into(),
                result: None,
                error: Some("boom".into()),
            }
        );

        let close = HubMessage::decode(r#"{"type":7,"allowReconnect":true}"#).expect("decodes");
        assert_eq!(
            close,
            HubMessage::Close {
                error: None,
                allow_reconnect: true
            }
        );

        assert_eq!(
            HubMessage::decode(r#"{"type":2,"invocationId":"1","item":3}"#).expect("decodes"),
            HubMessage::Unsupported(2)
        );
    }

    #[test]
    fn malformed_records_are_errors() {
        assert!(HubMessage::decode("not json").is_err());
        assert!(HubMessage::decode(r#"{"target":"x"}"#).is_err());
        assert!(HubMessage::decode(r#"{"type":1,"arguments":[]}"#).is_err());
        assert!(HubMessage::decode(r#"{"type":42}"#).is_err());
    }

    #[test]
    fn handshake_reply() {
        assert!(parse_handshake_response("{}").is_ok());
        assert_eq!(
            parse_handshake_response(r#"{"error":"Requested protocol 'json' is not available."}"#),
            Err("Requested protocol 'json' is not available.".to_string())
        );
        assert!(handshake_request().starts_with(r#"{"protocol":"json","version":1}"#)
            || handshake_request().starts_with(r#"{"version":1,"protocol":"json"}"#));
    }
}
