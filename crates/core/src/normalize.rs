//! Uniform read shapes for stored blocks.
//!
//! Stored event payloads come in two generations: JSON objects written by the
//! current decoder, and bare strings written by the first indexer. Both are
//! served in the same shape.

use serde::Serialize;
use serde_json::Value;

use crate::constants::UNKNOWN_EVENT_TYPE;
use crate::event::{lenient_u64, Event};
use crate::types::VirtualBlock;

/// An event as served to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender account.
    pub from: Option<String>,
    /// Recipient account.
    pub to: Option<String>,
    /// Amount, 0 when absent or not numeric.
    pub amount: u64,
    /// Undecoded text, for unknown events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Reward block reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    /// Rewarded validator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    /// Event-reported time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Signature, when the payload carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl NormalizedEvent {
    /// Normalize one stored event payload.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(object) => {
                let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
                Self {
                    kind: object
                        .get("type")
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .unwrap_or(UNKNOWN_EVENT_TYPE)
                        .to_string(),
                    from: text("from"),
                    to: text("to"),
                    amount: object.get("amount").and_then(lenient_u64).unwrap_or(0),
                    raw: text("raw"),
                    block: object.get("block").and_then(lenient_u64),
                    validator: text("validator"),
                    timestamp: object.get("timestamp").and_then(lenient_timestamp),
                    signature: text("signature"),
                }
            }
            Value::String(s) => Self::bare(Event::unknown_from_text(s).type_tag(), s),
            other => Self::bare(UNKNOWN_EVENT_TYPE, &other.to_string()),
        }
    }

    fn bare(kind: &str, raw: &str) -> Self {
        Self {
            kind: kind.to_string(),
            from: None,
            to: None,
            amount: 0,
            raw: Some(raw.to_string()),
            block: None,
            validator: None,
            timestamp: None,
            signature: None,
        }
    }
}

// Negative millisecond values are kept; numeric strings are accepted too.
fn lenient_timestamp(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| lenient_u64(value).map(|ts| i64::try_from(ts).unwrap_or(i64::MAX)))
}

/// Normalize a stored `events` payload.
///
/// Accepts an array, or a string holding a JSON-encoded array. Anything else
/// yields no events.
pub fn normalize_events(stored: &Value) -> Vec<NormalizedEvent> {
    match stored {
        Value::Array(items) => items.iter().map(NormalizedEvent::from_value).collect(),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(inner @ Value::Array(_)) => normalize_events(&inner),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// A block as served to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlock {
    /// Virtual block number.
    pub block_number: u64,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// Normalized events.
    pub events: Vec<NormalizedEvent>,
}

impl StoredBlock {
    /// Build the read shape from a stored `events` payload.
    pub fn from_stored(block_number: u64, timestamp: i64, events: &Value) -> Self {
        Self {
            block_number,
            timestamp,
            events: normalize_events(events),
        }
    }
}

impl From<&VirtualBlock> for StoredBlock {
    fn from(block: &VirtualBlock) -> Self {
        let events = block
            .events
            .iter()
            .map(|event| {
                serde_json::to_value(event)
                    .map(|value| NormalizedEvent::from_value(&value))
                    .unwrap_or_else(|_| NormalizedEvent::bare(event.type_tag(), ""))
            })
            .collect();
        Self {
            block_number: block.block_number.value(),
            timestamp: block.timestamp,
            events,
        }
    }
}
