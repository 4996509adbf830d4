//! Decoding of inbound text frames into an ordered list of events.
//!
//! A frame is either a single `{"type": .., "data": ..}` envelope or a
//! `{"type": "batch", "messages": [..]}` wrapper. Decoding never fails: bad
//! input is logged and dropped, and one bad batch element does not discard
//! its neighbours.

use serde_json::Value;

use crate::protocol::BATCH;

/// One routable event, as carried by a single envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub data: Value,
}

/// A parsed wire envelope before flattening.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Event),
    Batch(Vec<Value>),
}

impl Envelope {
    /// Classifies a JSON value. Returns `None` for anything that is not an
    /// object with a string `type`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };
        let event_type = object.get("type").and_then(Value::as_str)?.to_string();
        if event_type == BATCH {
            let messages = match object.remove("messages") {
                Some(Value::Array(messages)) => messages,
                _ => Vec::new(),
            };
            return Some(Self::Batch(messages));
        }
        let data = object.remove("data").unwrap_or(Value::Null);
        Some(Self::Single(Event { event_type, data }))
    }

    /// Flattens into dispatch order. Batches nested inside a batch are
    /// unwrapped once; deeper nesting is dropped.
    pub fn into_events(self) -> Vec<Event> {
        match self {
            Self::Single(event) => vec![event],
            Self::Batch(messages) => {
                let mut events = Vec::with_capacity(messages.len());
                for (index, message) in messages.into_iter().enumerate() {
                    match Self::from_value(message) {
                        Some(Self::Single(event)) => events.push(event),
                        Some(Self::Batch(inner)) => {
                            for nested in inner {
                                match Self::from_value(nested) {
                                    Some(Self::Single(event)) => events.push(event),
                                    Some(Self::Batch(_)) => tracing::debug!(
                                        target = "playbook_sync::envelope",
                                        index,
                                        "dropping batch nested more than one level deep"
                                    ),
                                    None => tracing::debug!(
                                        target = "playbook_sync::envelope",
                                        index,
                                        "skipping malformed nested batch element"
                                    ),
                                }
                            }
                        }
                        None => tracing::debug!(
                            target = "playbook_sync::envelope",
                            index,
                            "skipping malformed batch element"
                        ),
                    }
                }
                events
            }
        }
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

/// Decodes a raw text frame into events in dispatch order.
pub fn decode(raw: &str) -> Vec<Event> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                target = "playbook_sync::envelope",
                error = %error,
                raw = %preview(raw),
                "ignoring non-json text frame"
            );
            return Vec::new();
        }
    };

    match Envelope::from_value(value) {
        Some(envelope) => envelope.into_events(),
        None => {
            tracing::warn!(
                target = "playbook_sync::envelope",
                raw = %preview(raw),
                "ignoring frame without a string type"
            );
            Vec::new()
        }
    }
}
