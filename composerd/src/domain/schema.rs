//! Schema descriptors

use serde::{Deserialize, Serialize};

/// Schema id the engine reports when no schema has been deployed
pub const EMPTY_SCHEMA_ID: &str = ".default";

/// An input schema known to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaItem {
    pub id: String,
    pub name: String,
}

impl SchemaItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SchemaItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}
