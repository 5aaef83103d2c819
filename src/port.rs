//! Port types and functionality for node connections

use serde::{Deserialize, Serialize};

/// Unique identifier for a port within a node
pub type PortId = usize;

/// Represents a connection point on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
}

impl Port {
    /// Creates a new port
    pub fn new(id: PortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
