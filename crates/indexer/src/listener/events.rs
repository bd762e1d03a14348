//! Log notification types and the log line decoder.

use dopel_core::{Event, LOG_MARKER};
use serde::Deserialize;
use serde_json::Value;

/// One `logsNotification` from the chain: a transaction's logs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogNotification {
    /// Source transaction signature
    pub signature: String,

    /// Slot reported in the notification context
    pub slot: Option<u64>,

    /// Transaction error, if it failed (logs are still processed)
    pub err: Option<Value>,

    /// Raw log lines in emission order
    pub logs: Vec<String>,
}

impl LogNotification {
    /// Decoded program events of this notification.
    pub fn events(&self) -> Vec<Event> {
        decode_logs(&self.logs)
    }
}

/// Wire shape of a `logsNotification` result.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcLogsNotification {
    /// Notification context.
    #[serde(default)]
    pub context: Option<RpcContext>,

    /// Logs payload.
    pub value: RpcLogsValue,
}

/// Notification context.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcContext {
    /// Slot the notification was produced at.
    pub slot: u64,
}

/// Logs payload of a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcLogsValue {
    /// Transaction signature.
    pub signature: String,

    /// Transaction error, null on success.
    #[serde(default)]
    pub err: Option<Value>,

    /// Log lines, null when the node could not provide them.
    #[serde(default)]
    pub logs: Option<Vec<String>>,
}

impl From<RpcLogsNotification> for LogNotification {
    fn from(notification: RpcLogsNotification) -> Self {
        Self {
            signature: notification.value.signature,
            slot: notification.context.map(|context| context.slot),
            err: notification.value.err.filter(|err| !err.is_null()),
            logs: notification.value.logs.unwrap_or_default(),
        }
    }
}

/// The program message carried by a log line, if it is a program log.
pub fn program_message(line: &str) -> Option<String> {
    line.contains(LOG_MARKER)
        .then(|| line.replacen(LOG_MARKER, "", 1).trim().to_string())
}

/// Decode every program log line, preserving order. Never fails.
pub fn decode_logs(logs: &[String]) -> Vec<Event> {
    logs.iter()
        .filter_map(|line| program_message(line))
        .map(|message| Event::decode(&message))
        .collect()
}
