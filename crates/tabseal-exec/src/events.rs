//! Run events buffered in memory and written once, at finish, as `events.jsonl`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabseal_core::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts_ms: i64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl RunEvent {
    pub fn new(
        ts_ms: i64,
        kind: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            ts_ms,
            kind: kind.into(),
            message: message.into(),
            ordinal: None,
            data,
        }
    }

    pub fn for_step(mut self, ordinal: u64) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

/// One compact JSON object per line, newline-terminated.
pub fn to_jsonl(events: &[RunEvent]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for e in events {
        serde_json::to_writer(&mut out, e)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn from_jsonl(bytes: &[u8]) -> Result<Vec<RunEvent>> {
    let mut events = Vec::new();
    for line in bytes.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        events.push(serde_json::from_slice(line)?);
    }
    Ok(events)
}
