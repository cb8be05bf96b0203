//! Event types for the composerd message bus
//!
//! All events are immutable values. `Response` carries one consolidated engine
//! turn; the other variants are decoded from engine notifications or produced
//! when the engine declines a key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CandidateMenu, Commit, Composition, KeyModifiers, Status};
use crate::engine::RawNotification;

/// Deployment (resource compilation) phase reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Start,
    Success,
    Failure,
}

/// Events delivered through the [`MessageBus`](super::MessageBus)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Active schema changed
    SchemaChanged { id: String, name: String },

    /// A runtime option was switched
    OptionChanged { name: String, value: bool },

    /// Resource deployment progressed
    DeployStateChanged { phase: DeployPhase },

    /// Consolidated state after an engine operation
    Response {
        commit: Option<Commit>,
        composition: Composition,
        menu: CandidateMenu,
        raw_input: String,
        status: Status,
    },

    /// The engine did not consume a key
    KeyUnhandled { key_value: i32, modifiers: KeyModifiers },
}

impl Event {
    /// Short type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::SchemaChanged { .. } => "SchemaChanged",
            Event::OptionChanged { .. } => "OptionChanged",
            Event::DeployStateChanged { .. } => "DeployStateChanged",
            Event::Response { .. } => "Response",
            Event::KeyUnhandled { .. } => "KeyUnhandled",
        }
    }

    /// Decode an engine notification
    ///
    /// Malformed or unknown notifications are contract violations; callers
    /// drop them and keep going.
    pub fn from_notification(raw: &RawNotification) -> Result<Event, DecodeError> {
        let value = raw.message_value.as_str();
        match raw.message_type.as_str() {
            "schema" => {
                let (id, name) = value
                    .split_once('/')
                    .ok_or_else(|| DecodeError::MalformedSchema(value.to_string()))?;
                if id.is_empty() {
                    return Err(DecodeError::MalformedSchema(value.to_string()));
                }
                Ok(Event::SchemaChanged {
                    id: id.to_string(),
                    name: name.to_string(),
                })
            }
            "option" => {
                let (name, value) = match value.strip_prefix('!') {
                    Some(name) => (name, false),
                    None => (value, true),
                };
                if name.is_empty() {
                    return Err(DecodeError::EmptyOption);
                }
                Ok(Event::OptionChanged {
                    name: name.to_string(),
                    value,
                })
            }
            "deploy" => {
                let phase = match value {
                    "start" => DeployPhase::Start,
                    "success" => DeployPhase::Success,
                    "failure" => DeployPhase::Failure,
                    other => return Err(DecodeError::UnknownDeployPhase(other.to_string())),
                };
                Ok(Event::DeployStateChanged { phase })
            }
            other => Err(DecodeError::UnknownType {
                message_type: other.to_string(),
                message_value: value.to_string(),
            }),
        }
    }
}

/// Engine notification that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unknown notification type {message_type:?} (value {message_value:?})")]
    UnknownType { message_type: String, message_value: String },

    #[error("Malformed schema notification: {0:?}")]
    MalformedSchema(String),

    #[error("Option notification without a name")]
    EmptyOption,

    #[error("Unknown deploy phase: {0:?}")]
    UnknownDeployPhase(String),
}

/// Event log entry with timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
