//! # Type System
//!
//! Typed values are the currency of the engine: every column declares a
//! [`ColumnType`] plus a logical size, every cell holds an optional
//! [`Value`], and the serializer maps values onto the fixed-width byte
//! layout the column store relies on for tuple-id arithmetic.
//!
//! - `data_type`: the [`ColumnType`] tags, canonical names and size model.
//! - `value`: the [`Value`] container with its scalar and vector variants,
//!   plus [`Complex32`]/[`Complex64`] and the packed [`BitVector`].
//! - `serializer`: fixed-width little-endian serialization, validated
//!   against the declared type before any byte is written.

mod column;
mod data_type;
mod serializer;
mod value;

pub use column::ColumnDef;
pub use data_type::ColumnType;
pub use serializer::{deserialize, physical_size, serialize, validate};
pub use value::{BitVector, Complex32, Complex64, Value};
