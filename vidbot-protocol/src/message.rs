//! Bot output messages and their CBOR wire encoding.
//!
//! A bot emits dynamically-typed structured records (maps, arrays, strings,
//! integers, floats, booleans, null, byte strings). On the wire each record
//! travels inside an envelope carrying its kind and the frame interval it
//! applies to, encoded as CBOR and framed with a big-endian `u32` length
//! prefix at the sink boundary.

use std::io::{Read, Write};

use ciborium::value::{Integer, Value};
use thiserror::Error;

use crate::types::FrameId;

/// Upper bound on a single wire record. Larger records are rejected rather
/// than buffered.
pub const MAX_WIRE_MESSAGE: usize = 16 * 1024 * 1024;

/// Classification of a bot output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Analysis = 1,
    Debug = 2,
    Control = 3,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageKind::Analysis),
            2 => Some(MessageKind::Debug),
            3 => Some(MessageKind::Control),
            _ => None,
        }
    }

    /// Human-readable name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Analysis => "analysis",
            MessageKind::Debug => "debug",
            MessageKind::Control => "control",
        }
    }
}

/// A bot output message together with its routing envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct BotMessage {
    pub kind: MessageKind,
    /// Frame interval the payload applies to. `{0,0}` means not frame-bound.
    pub frame_id: FrameId,
    pub payload: Value,
}

/// Errors from encoding, decoding, or framing wire records.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("wire record too large: {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Build a control command record: `{"action": action, "body": body}`.
pub fn control_command(action: &str, body: Vec<(Value, Value)>) -> Value {
    Value::Map(vec![
        (
            Value::Text("action".to_string()),
            Value::Text(action.to_string()),
        ),
        (Value::Text("body".to_string()), Value::Map(body)),
    ])
}

/// Extract the `action` of a control command, if the record has that shape.
pub fn command_action(message: &Value) -> Option<&str> {
    map_get(message, "action").and_then(|v| match v {
        Value::Text(s) => Some(s.as_str()),
        _ => None,
    })
}

/// Extract the `body` map of a control command, if present.
pub fn command_body(message: &Value) -> Option<&Vec<(Value, Value)>> {
    map_get(message, "body").and_then(|v| match v {
        Value::Map(entries) => Some(entries),
        _ => None,
    })
}

fn map_get<'a>(message: &'a Value, key: &str) -> Option<&'a Value> {
    let Value::Map(entries) = message else {
        return None;
    };
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(s) if s == key => Some(v),
        _ => None,
    })
}

fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(i) => u64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Encode a message envelope to CBOR bytes.
pub fn encode_message(message: &BotMessage) -> Result<Vec<u8>, WireError> {
    let envelope = Value::Map(vec![
        (
            Value::Text("kind".to_string()),
            Value::Integer(Integer::from(message.kind as u8)),
        ),
        (
            Value::Text("i1".to_string()),
            Value::Integer(Integer::from(message.frame_id.i1)),
        ),
        (
            Value::Text("i2".to_string()),
            Value::Integer(Integer::from(message.frame_id.i2)),
        ),
        (Value::Text("payload".to_string()), message.payload.clone()),
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&envelope, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a message envelope from CBOR bytes.
pub fn decode_message(bytes: &[u8]) -> Result<BotMessage, WireError> {
    let envelope: Value =
        ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))?;

    let kind = map_get(&envelope, "kind")
        .and_then(value_u64)
        .and_then(|k| u8::try_from(k).ok())
        .and_then(MessageKind::from_u8)
        .ok_or_else(|| WireError::Decode("missing or invalid 'kind'".to_string()))?;
    let i1 = map_get(&envelope, "i1")
        .and_then(value_u64)
        .ok_or_else(|| WireError::Decode("missing or invalid 'i1'".to_string()))?;
    let i2 = map_get(&envelope, "i2")
        .and_then(value_u64)
        .ok_or_else(|| WireError::Decode("missing or invalid 'i2'".to_string()))?;
    let payload = map_get(&envelope, "payload")
        .cloned()
        .ok_or_else(|| WireError::Decode("missing 'payload'".to_string()))?;

    Ok(BotMessage {
        kind,
        frame_id: FrameId { i1, i2 },
        payload,
    })
}

/// Write one length-prefixed record to a byte-oriented writer.
pub fn write_framed<W: Write>(writer: &mut W, record: &[u8]) -> Result<(), WireError> {
    if record.len() > MAX_WIRE_MESSAGE {
        return Err(WireError::TooLarge(record.len()));
    }
    let len = (record.len() as u32).to_be_bytes();
    writer.write_all(&len)?;
    writer.write_all(record)?;
    Ok(())
}

/// Read one length-prefixed record from a byte-oriented reader.
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_WIRE_MESSAGE {
        return Err(WireError::TooLarge(len));
    }

    let mut record = vec![0u8; len];
    reader.read_exact(&mut record)?;
    Ok(record)
}
