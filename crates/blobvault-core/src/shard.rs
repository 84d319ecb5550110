//! Shard identity and routing
//!
//! Blob tables are split into numbered shards. The shard management layer
//! decides which node hosts which shard; this module only carries the
//! identifiers it hands over.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TableNameError;

/// Identity of one physical shard of a blob table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId {
    /// Name of the owning blob table
    pub table: String,
    /// Shard number within the table
    pub shard: u32,
}

impl ShardId {
    /// Create a new shard id
    pub fn new(table: impl Into<String>, shard: u32) -> Self {
        Self {
            table: table.into(),
            shard,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.table, self.shard)
    }
}

/// Routing entry of a shard copy on the local node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardRouting {
    /// Node hosting this copy
    pub node_id: String,
    /// Whether this copy is the primary
    pub primary: bool,
}

impl ShardRouting {
    /// Routing entry for a primary copy
    pub fn primary(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            primary: true,
        }
    }

    /// Routing entry for a replica copy
    pub fn replica(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            primary: false,
        }
    }
}

/// Check that a table name can be used as a single directory name
///
/// Table names end up as path components under a base directory, so
/// anything that could escape it is rejected.
pub fn validate_table_name(name: &str) -> Result<(), TableNameError> {
    if name.is_empty() {
        return Err(TableNameError::Empty);
    }
    if name == "." || name == ".." {
        return Err(TableNameError::Reserved(name.to_string()));
    }
    if let Some(character) = name
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
    {
        return Err(TableNameError::ForbiddenCharacter {
            name: name.to_string(),
            character,
        });
    }
    Ok(())
}
