//! # Column Types
//!
//! [`ColumnType`] enumerates everything a column can hold: the scalar
//! primitives, the two complex scalars, and fixed-length vectors of each
//! numeric element plus a packed bit vector. Each type carries a stable u16
//! tag (persisted in the column header) and a canonical upper-case name;
//! tags and names are bijective.
//!
//! ## Size model
//!
//! A column declares a *logical size*: the element count for vectors, the
//! maximum UTF-8 byte length for strings, and 1 for every other scalar. The
//! *physical size* is the number of bytes one serialized value occupies; it
//! is a pure function of `(type, logical size)` so record slots are fixed
//! width and tuple ids can be mapped to file offsets arithmetically.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Complex32,
    Complex64,
    BooleanVector,
    IntVector,
    LongVector,
    FloatVector,
    DoubleVector,
    Complex32Vector,
    Complex64Vector,
}

impl ColumnType {
    /// Stable on-disk tag of this type.
    pub fn tag(&self) -> u16 {
        match self {
            ColumnType::Boolean => 0,
            ColumnType::Byte => 1,
            ColumnType::Short => 2,
            ColumnType::Int => 3,
            ColumnType::Long => 4,
            ColumnType::Float => 5,
            ColumnType::Double => 6,
            ColumnType::String => 7,
            ColumnType::Complex32 => 8,
            ColumnType::Complex64 => 9,
            ColumnType::BooleanVector => 10,
            ColumnType::IntVector => 11,
            ColumnType::LongVector => 12,
            ColumnType::FloatVector => 13,
            ColumnType::DoubleVector => 14,
            ColumnType::Complex32Vector => 15,
            ColumnType::Complex64Vector => 16,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        Some(match tag {
            0 => ColumnType::Boolean,
            1 => ColumnType::Byte,
            2 => ColumnType::Short,
            3 => ColumnType::Int,
            4 => ColumnType::Long,
            5 => ColumnType::Float,
            6 => ColumnType::Double,
            7 => ColumnType::String,
            8 => ColumnType::Complex32,
            9 => ColumnType::Complex64,
            10 => ColumnType::BooleanVector,
            11 => ColumnType::IntVector,
            12 => ColumnType::LongVector,
            13 => ColumnType::FloatVector,
            14 => ColumnType::DoubleVector,
            15 => ColumnType::Complex32Vector,
            16 => ColumnType::Complex64Vector,
            _ => return None,
        })
    }

    /// Canonical name, bijective with the tag.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Byte => "BYTE",
            ColumnType::Short => "SHORT",
            ColumnType::Int => "INTEGER",
            ColumnType::Long => "LONG",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::String => "STRING",
            ColumnType::Complex32 => "COMPLEX32",
            ColumnType::Complex64 => "COMPLEX64",
            ColumnType::BooleanVector => "BOOL_VEC",
            ColumnType::IntVector => "INT_VEC",
            ColumnType::LongVector => "LONG_VEC",
            ColumnType::FloatVector => "FLOAT_VEC",
            ColumnType::DoubleVector => "DOUBLE_VEC",
            ColumnType::Complex32Vector => "COMPLEX32_VEC",
            ColumnType::Complex64Vector => "COMPLEX64_VEC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "BOOLEAN" => ColumnType::Boolean,
            "BYTE" => ColumnType::Byte,
            "SHORT" => ColumnType::Short,
            "INTEGER" => ColumnType::Int,
            "LONG" => ColumnType::Long,
            "FLOAT" => ColumnType::Float,
            "DOUBLE" => ColumnType::Double,
            "STRING" => ColumnType::String,
            "COMPLEX32" => ColumnType::Complex32,
            "COMPLEX64" => ColumnType::Complex64,
            "BOOL_VEC" => ColumnType::BooleanVector,
            "INT_VEC" => ColumnType::IntVector,
            "LONG_VEC" => ColumnType::LongVector,
            "FLOAT_VEC" => ColumnType::FloatVector,
            "DOUBLE_VEC" => ColumnType::DoubleVector,
            "COMPLEX32_VEC" => ColumnType::Complex32Vector,
            "COMPLEX64_VEC" => ColumnType::Complex64Vector,
            _ => return None,
        })
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            ColumnType::BooleanVector
                | ColumnType::IntVector
                | ColumnType::LongVector
                | ColumnType::FloatVector
                | ColumnType::DoubleVector
                | ColumnType::Complex32Vector
                | ColumnType::Complex64Vector
        )
    }

    pub fn is_numeric_scalar(&self) -> bool {
        matches!(
            self,
            ColumnType::Byte
                | ColumnType::Short
                | ColumnType::Int
                | ColumnType::Long
                | ColumnType::Float
                | ColumnType::Double
        )
    }

    /// Bytes per element for element-wise layouts. Strings and bit vectors
    /// are handled separately by the size formula.
    pub fn element_size(&self) -> usize {
        match self {
            ColumnType::Boolean | ColumnType::Byte => 1,
            ColumnType::Short => 2,
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::Long | ColumnType::Double => 8,
            ColumnType::Complex32 => 8,
            ColumnType::Complex64 => 16,
            ColumnType::String => 1,
            ColumnType::BooleanVector => 1,
            ColumnType::IntVector | ColumnType::FloatVector => 4,
            ColumnType::LongVector | ColumnType::DoubleVector => 8,
            ColumnType::Complex32Vector => 8,
            ColumnType::Complex64Vector => 16,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ColumnType; 17] = [
        ColumnType::Boolean,
        ColumnType::Byte,
        ColumnType::Short,
        ColumnType::Int,
        ColumnType::Long,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::String,
        ColumnType::Complex32,
        ColumnType::Complex64,
        ColumnType::BooleanVector,
        ColumnType::IntVector,
        ColumnType::LongVector,
        ColumnType::FloatVector,
        ColumnType::DoubleVector,
        ColumnType::Complex32Vector,
        ColumnType::Complex64Vector,
    ];

    #[test]
    fn tags_round_trip() {
        for ty in ALL {
            assert_eq!(ColumnType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(ColumnType::from_tag(999), None);
    }

    #[test]
    fn names_round_trip() {
        for ty in ALL {
            assert_eq!(ColumnType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ColumnType::from_name("TENSOR"), None);
    }
}
