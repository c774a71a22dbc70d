//! # Entity Header Document
//!
//! The entity's `index.db` store holds one JSON document describing the
//! entity: its size (row count), timestamps, column definitions and index
//! definitions. The document is small and changes rarely outside of the
//! size counter, so it persists as a single blob through the page store and
//! rides the store's WAL for atomic commits.

use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::index::IndexDef;
use crate::types::ColumnDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    /// Row count across the shared tuple-id space.
    pub size: u64,
    /// Creation time, millis since epoch.
    pub created: u64,
    /// Last modification time, millis since epoch.
    pub modified: u64,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl EntityHeader {
    pub fn new(columns: Vec<ColumnDef>, now: u64) -> Self {
        Self {
            size: 0,
            created: now,
            modified: now,
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DatabaseError> {
        serde_json::to_vec(self)
            .map_err(|e| DatabaseError::Corruption(format!("entity header serialization: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DatabaseError::Corruption(format!("unreadable entity header: {e}")))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::types::ColumnType;

    #[test]
    fn round_trips_with_indexes() {
        let mut header = EntityHeader::new(
            vec![
                ColumnDef::new("id", ColumnType::String, 36, false),
                ColumnDef::new("vec", ColumnType::FloatVector, 128, false),
            ],
            123,
        );
        header.size = 7;
        header
            .indexes
            .push(IndexDef::new("id_idx", IndexType::UniqueHash, vec!["id".into()]));

        let parsed = EntityHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.column("vec").is_some());
        assert!(parsed.index("id_idx").is_some());
    }
}
