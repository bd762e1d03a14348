//! Program events decoded from log lines.
//!
//! Decoding is tag-first: a JSON object's `type` field selects the variant and
//! the remaining fields are read leniently. Anything that cannot be matched is
//! kept as [`Event::Unknown`] with the original text.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::constants::{
    LEGACY_MINT_EVENT_TYPE, MINT_EVENT_TYPE, TRANSFER_EVENT_TYPE, TYPE_DELIMITER,
    UNKNOWN_EVENT_TYPE, VALIDATOR_REWARD_EVENT_TYPE,
};

/// A typed event emitted by the indexed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Token transfer between two accounts.
    Transfer {
        /// Sender account.
        from: Option<String>,
        /// Recipient account.
        to: Option<String>,
        /// Transferred amount (base units).
        amount: u64,
    },

    /// Newly minted tokens.
    Mint {
        /// Recipient account.
        to: Option<String>,
        /// Minted amount (base units).
        amount: u64,
    },

    /// Reward paid to a validator.
    ValidatorReward {
        /// Block the reward refers to, if the program reported one.
        block: Option<u64>,
        /// Rewarded validator.
        validator: Option<String>,
        /// Reward amount (base units).
        amount: u64,
        /// Reward time in milliseconds, if the program reported one.
        timestamp: Option<i64>,
    },

    /// A log line that could not be decoded into a known event.
    ///
    /// JSON payloads keep whatever `from`/`to`/`amount` they carried.
    Unknown {
        /// Best-effort type tag.
        kind: String,
        /// Sender account, if the payload named one.
        from: Option<String>,
        /// Recipient account, if the payload named one.
        to: Option<String>,
        /// Amount, 0 when absent or not numeric.
        amount: u64,
        /// Log text with the marker stripped.
        raw: String,
    },
}

impl Event {
    /// Decode one log message (marker already stripped). Never fails.
    pub fn decode(message: &str) -> Self {
        match serde_json::from_str::<Value>(message) {
            Ok(value) => Self::from_value(&value, message),
            Err(_) => Self::unknown_from_text(message),
        }
    }

    /// Build an event from parsed JSON, keeping `raw` for the fallback case.
    pub fn from_value(value: &Value, raw: &str) -> Self {
        let Some(object) = value.as_object() else {
            return Self::unknown(UNKNOWN_EVENT_TYPE, raw);
        };

        match object.get("type").and_then(Value::as_str) {
            Some(TRANSFER_EVENT_TYPE) => Event::Transfer {
                from: string_field(object, "from"),
                to: string_field(object, "to"),
                amount: amount_field(object),
            },
            Some(MINT_EVENT_TYPE) | Some(LEGACY_MINT_EVENT_TYPE) => Event::Mint {
                to: string_field(object, "to"),
                amount: amount_field(object),
            },
            Some(VALIDATOR_REWARD_EVENT_TYPE) => Event::ValidatorReward {
                block: object.get("block").and_then(lenient_u64),
                validator: string_field(object, "validator"),
                amount: amount_field(object),
                timestamp: object
                    .get("timestamp")
                    .and_then(lenient_u64)
                    .map(|ts| i64::try_from(ts).unwrap_or(i64::MAX)),
            },
            Some(tag) if !tag.trim().is_empty() => Self::untyped(tag.trim(), object, raw),
            _ => Self::untyped(UNKNOWN_EVENT_TYPE, object, raw),
        }
    }

    fn untyped(kind: &str, object: &Map<String, Value>, raw: &str) -> Self {
        Event::Unknown {
            kind: kind.to_string(),
            from: string_field(object, "from"),
            to: string_field(object, "to"),
            amount: amount_field(object),
            raw: raw.to_string(),
        }
    }

    /// Fallback for text that is not JSON: the tag is whatever precedes the
    /// first delimiter, or `Unknown` if there is no usable prefix.
    pub fn unknown_from_text(message: &str) -> Self {
        let kind = match message.split_once(TYPE_DELIMITER) {
            Some((head, _)) if !head.trim().is_empty() => head.trim(),
            _ => UNKNOWN_EVENT_TYPE,
        };
        Self::unknown(kind, message)
    }

    fn unknown(kind: &str, raw: &str) -> Self {
        Event::Unknown {
            kind: kind.to_string(),
            from: None,
            to: None,
            amount: 0,
            raw: raw.to_string(),
        }
    }

    /// Type tag as stored in transaction records.
    pub fn type_tag(&self) -> &str {
        match self {
            Event::Transfer { .. } => TRANSFER_EVENT_TYPE,
            Event::Mint { .. } => MINT_EVENT_TYPE,
            Event::ValidatorReward { .. } => VALIDATOR_REWARD_EVENT_TYPE,
            Event::Unknown { kind, .. } => kind,
        }
    }

    /// Amount carried by the event, 0 when it has none.
    pub fn amount(&self) -> u64 {
        match self {
            Event::Transfer { amount, .. }
            | Event::Mint { amount, .. }
            | Event::ValidatorReward { amount, .. }
            | Event::Unknown { amount, .. } => *amount,
        }
    }

    /// Sender account, if the event has one.
    pub fn from_account(&self) -> Option<&str> {
        match self {
            Event::Transfer { from, .. } | Event::Unknown { from, .. } => from.as_deref(),
            _ => None,
        }
    }

    /// Recipient account, if the event has one.
    pub fn to_account(&self) -> Option<&str> {
        match self {
            Event::Transfer { to, .. } | Event::Mint { to, .. } | Event::Unknown { to, .. } => {
                to.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the event should also produce a validator reward row.
    pub fn is_reward(&self) -> bool {
        matches!(self, Event::ValidatorReward { .. })
    }
}

// Stored as a flat object keyed by `type`, the same shape the program logs.
impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Event::Transfer { from, to, amount } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("type", TRANSFER_EVENT_TYPE)?;
                map.serialize_entry("from", from)?;
                map.serialize_entry("to", to)?;
                map.serialize_entry("amount", amount)?;
                map.end()
            }
            Event::Mint { to, amount } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", MINT_EVENT_TYPE)?;
                map.serialize_entry("to", to)?;
                map.serialize_entry("amount", amount)?;
                map.end()
            }
            Event::ValidatorReward {
                block,
                validator,
                amount,
                timestamp,
            } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("type", VALIDATOR_REWARD_EVENT_TYPE)?;
                map.serialize_entry("block", block)?;
                map.serialize_entry("validator", validator)?;
                map.serialize_entry("amount", amount)?;
                map.serialize_entry("timestamp", timestamp)?;
                map.end()
            }
            // Plain-text lines carry only their tag and text.
            Event::Unknown {
                kind,
                from,
                to,
                amount,
                raw,
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("type", kind)?;
                if let Some(from) = from {
                    map.serialize_entry("from", from)?;
                }
                if let Some(to) = to {
                    map.serialize_entry("to", to)?;
                }
                if *amount > 0 {
                    map.serialize_entry("amount", amount)?;
                }
                map.serialize_entry("raw", raw)?;
                map.end()
            }
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn amount_field(object: &Map<String, Value>) -> u64 {
    object.get("amount").and_then(lenient_u64).unwrap_or(0)
}

/// Read a non-negative integer from a JSON number or numeric string.
///
/// Fractions are truncated; negatives and non-numeric values yield `None`.
pub fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(float_to_u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_u64))
        }
        _ => None,
    }
}

fn float_to_u64(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 {
        Some(f.trunc() as u64)
    } else {
        None
    }
}
