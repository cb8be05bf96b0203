//! Engine status snapshot

use serde::{Deserialize, Serialize};

/// Engine status as last reported by the engine
///
/// Carries the active schema and the mode flags the UI shows in its status
/// area. Replaced wholesale on every refresh, never patched field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Active schema identifier (e.g. "luna_pinyin")
    pub schema_id: String,
    /// Human readable schema name
    pub schema_name: String,
    /// Engine is in maintenance mode and ignores input
    pub is_disabled: bool,
    /// A composition is in progress
    pub is_composing: bool,
    /// ASCII (pass-through) mode
    pub is_ascii_mode: bool,
    /// Full-width character shape
    pub is_full_shape: bool,
    /// Simplified Chinese output
    pub is_simplified: bool,
    /// Traditional Chinese output
    pub is_traditional: bool,
    /// ASCII punctuation
    pub is_ascii_punct: bool,
}

impl Status {
    /// Look up a mode flag by its runtime option name
    ///
    /// Returns `None` for option names that have no status flag.
    pub fn flag(&self, option: &str) -> Option<bool> {
        match option {
            "ascii_mode" => Some(self.is_ascii_mode),
            "full_shape" => Some(self.is_full_shape),
            "simplification" => Some(self.is_simplified),
            "traditional" => Some(self.is_traditional),
            "ascii_punct" => Some(self.is_ascii_punct),
            _ => None,
        }
    }

    /// Copy of this status with one mode flag changed
    ///
    /// Unknown option names leave the status unchanged.
    pub fn with_flag(&self, option: &str, value: bool) -> Status {
        let mut next = self.clone();
        match option {
            "ascii_mode" => next.is_ascii_mode = value,
            "full_shape" => next.is_full_shape = value,
            "simplification" => next.is_simplified = value,
            "traditional" => next.is_traditional = value,
            "ascii_punct" => next.is_ascii_punct = value,
            _ => {}
        }
        next
    }
}
