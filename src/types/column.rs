//! # Column Definitions
//!
//! A [`ColumnDef`] is the catalog-level description of one column: its name,
//! declared type, logical size and nullability. Definitions are persisted
//! inside the entity header document and shared by recordsets as their row
//! schema.

use serde::{Deserialize, Serialize};

use super::ColumnType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub logical_size: usize,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        logical_size: usize,
        nullable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            logical_size,
            nullable,
        }
    }

    /// Scalar column of logical size 1.
    pub fn scalar(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self::new(name, column_type, 1, nullable)
    }

    /// Bytes one serialized value of this column occupies.
    pub fn physical_size(&self) -> usize {
        super::physical_size(self.column_type, self.logical_size)
    }
}

impl std::fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.column_type.is_vector() {
            write!(f, "{} {}[{}]", self.name, self.column_type, self.logical_size)
        } else {
            write!(f, "{} {}", self.name, self.column_type)
        }
    }
}
