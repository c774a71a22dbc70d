//! # Fixed-Width Value Serialization
//!
//! Maps a [`Value`] onto the byte layout of a column record slot. Every
//! layout is a pure function of `(type, logical size)`, so slots are fixed
//! width and the column store can address tuple ids arithmetically.
//!
//! | Type | Layout |
//! |---|---|
//! | BOOLEAN | 1 byte, 0 or 1 |
//! | BYTE / SHORT / INTEGER / LONG | little-endian two's complement |
//! | FLOAT / DOUBLE | little-endian IEEE 754 |
//! | STRING | u32 byte length + `logical` bytes of UTF-8 payload area |
//! | COMPLEX32 / COMPLEX64 | re then im |
//! | numeric vectors | `n * element size` bytes, element-wise LE |
//! | BOOL_VEC | `ceil(n/64)` u64 words, LE |
//!
//! Validation happens before any byte is written: a type mismatch, a vector
//! of the wrong length or an oversized string raises a [`ValidationError`]
//! and leaves the output untouched.

use crate::error::{DatabaseError, ValidationError};

use super::{BitVector, ColumnType, Complex32, Complex64, Value};

/// Bytes one serialized value of `(ty, logical)` occupies.
pub fn physical_size(ty: ColumnType, logical: usize) -> usize {
    match ty {
        ColumnType::Boolean | ColumnType::Byte => 1,
        ColumnType::Short => 2,
        ColumnType::Int | ColumnType::Float => 4,
        ColumnType::Long | ColumnType::Double => 8,
        ColumnType::Complex32 => 8,
        ColumnType::Complex64 => 16,
        ColumnType::String => 4 + logical,
        ColumnType::BooleanVector => logical.div_ceil(64) * 8,
        ColumnType::IntVector | ColumnType::FloatVector => 4 * logical,
        ColumnType::LongVector | ColumnType::DoubleVector => 8 * logical,
        ColumnType::Complex32Vector => 8 * logical,
        ColumnType::Complex64Vector => 16 * logical,
    }
}

/// Checks that `value` matches the declared type and logical size of the
/// column named `column`.
pub fn validate(
    value: &Value,
    ty: ColumnType,
    logical: usize,
    column: &str,
) -> Result<(), ValidationError> {
    let actual = value.column_type();
    if actual != ty {
        return Err(ValidationError::TypeMismatch {
            column: column.to_string(),
            expected: ty.name().to_string(),
            actual: actual.name().to_string(),
        });
    }
    match value {
        Value::String(s) => {
            if s.len() > logical {
                return Err(ValidationError::StringTooLong {
                    column: column.to_string(),
                    logical,
                    actual: s.len(),
                });
            }
        }
        v if ty.is_vector() => {
            let len = v.logical_size();
            if len != logical {
                return Err(ValidationError::VectorSizeMismatch {
                    column: column.to_string(),
                    expected: logical,
                    actual: len,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// Serializes `value` into `out`, which must span exactly
/// `physical_size(ty, logical)` bytes.
pub fn serialize(
    value: &Value,
    ty: ColumnType,
    logical: usize,
    column: &str,
    out: &mut [u8],
) -> Result<(), ValidationError> {
    validate(value, ty, logical, column)?;
    debug_assert_eq!(out.len(), physical_size(ty, logical));

    match value {
        Value::Boolean(v) => out[0] = u8::from(*v),
        Value::Byte(v) => out[0] = *v as u8,
        Value::Short(v) => out.copy_from_slice(&v.to_le_bytes()),
        Value::Int(v) => out.copy_from_slice(&v.to_le_bytes()),
        Value::Long(v) => out.copy_from_slice(&v.to_le_bytes()),
        Value::Float(v) => out.copy_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.copy_from_slice(&v.to_le_bytes()),
        Value::String(s) => {
            out.fill(0);
            out[..4].copy_from_slice(&(s.len() as u32).to_le_bytes());
            out[4..4 + s.len()].copy_from_slice(s.as_bytes());
        }
        Value::Complex32(c) => {
            out[..4].copy_from_slice(&c.re.to_le_bytes());
            out[4..].copy_from_slice(&c.im.to_le_bytes());
        }
        Value::Complex64(c) => {
            out[..8].copy_from_slice(&c.re.to_le_bytes());
            out[8..].copy_from_slice(&c.im.to_le_bytes());
        }
        Value::BooleanVector(v) => {
            for (chunk, word) in out.chunks_exact_mut(8).zip(v.words()) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
        Value::IntVector(v) => write_elements(out, v, |e, c| c.copy_from_slice(&e.to_le_bytes()), 4),
        Value::LongVector(v) => write_elements(out, v, |e, c| c.copy_from_slice(&e.to_le_bytes()), 8),
        Value::FloatVector(v) => write_elements(out, v, |e, c| c.copy_from_slice(&e.to_le_bytes()), 4),
        Value::DoubleVector(v) => write_elements(out, v, |e, c| c.copy_from_slice(&e.to_le_bytes()), 8),
        Value::Complex32Vector(v) => write_elements(
            out,
            v,
            |e, c| {
                c[..4].copy_from_slice(&e.re.to_le_bytes());
                c[4..].copy_from_slice(&e.im.to_le_bytes());
            },
            8,
        ),
        Value::Complex64Vector(v) => write_elements(
            out,
            v,
            |e, c| {
                c[..8].copy_from_slice(&e.re.to_le_bytes());
                c[8..].copy_from_slice(&e.im.to_le_bytes());
            },
            16,
        ),
    }
    Ok(())
}

fn write_elements<T: Copy>(out: &mut [u8], elems: &[T], write: impl Fn(T, &mut [u8]), width: usize) {
    for (elem, chunk) in elems.iter().zip(out.chunks_exact_mut(width)) {
        write(*elem, chunk);
    }
}

/// Deserializes one value of `(ty, logical)` from `bytes`.
pub fn deserialize(ty: ColumnType, logical: usize, bytes: &[u8]) -> Result<Value, DatabaseError> {
    debug_assert_eq!(bytes.len(), physical_size(ty, logical));
    Ok(match ty {
        ColumnType::Boolean => Value::Boolean(bytes[0] != 0),
        ColumnType::Byte => Value::Byte(bytes[0] as i8),
        ColumnType::Short => Value::Short(i16::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Int => Value::Int(i32::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Long => Value::Long(i64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Float => Value::Float(f32::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Double => Value::Double(f64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::String => {
            let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
            if len > logical {
                return Err(DatabaseError::Corruption(format!(
                    "string length {len} exceeds logical size {logical}"
                )));
            }
            let s = std::str::from_utf8(&bytes[4..4 + len])
                .map_err(|e| DatabaseError::Corruption(format!("invalid UTF-8 payload: {e}")))?;
            Value::String(s.to_string())
        }
        ColumnType::Complex32 => Value::Complex32(Complex32::new(
            f32::from_le_bytes(bytes[..4].try_into().unwrap()),
            f32::from_le_bytes(bytes[4..].try_into().unwrap()),
        )),
        ColumnType::Complex64 => Value::Complex64(Complex64::new(
            f64::from_le_bytes(bytes[..8].try_into().unwrap()),
            f64::from_le_bytes(bytes[8..].try_into().unwrap()),
        )),
        ColumnType::BooleanVector => {
            let words = bytes
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Value::BooleanVector(BitVector::from_words(logical, words))
        }
        ColumnType::IntVector => Value::IntVector(read_elements(bytes, 4, |c| {
            i32::from_le_bytes(c.try_into().unwrap())
        })),
        ColumnType::LongVector => Value::LongVector(read_elements(bytes, 8, |c| {
            i64::from_le_bytes(c.try_into().unwrap())
        })),
        ColumnType::FloatVector => Value::FloatVector(read_elements(bytes, 4, |c| {
            f32::from_le_bytes(c.try_into().unwrap())
        })),
        ColumnType::DoubleVector => Value::DoubleVector(read_elements(bytes, 8, |c| {
            f64::from_le_bytes(c.try_into().unwrap())
        })),
        ColumnType::Complex32Vector => Value::Complex32Vector(read_elements(bytes, 8, |c| {
            Complex32::new(
                f32::from_le_bytes(c[..4].try_into().unwrap()),
                f32::from_le_bytes(c[4..].try_into().unwrap()),
            )
        })),
        ColumnType::Complex64Vector => Value::Complex64Vector(read_elements(bytes, 16, |c| {
            Complex64::new(
                f64::from_le_bytes(c[..8].try_into().unwrap()),
                f64::from_le_bytes(c[8..].try_into().unwrap()),
            )
        })),
    })
}

fn read_elements<T>(bytes: &[u8], width: usize, read: impl Fn(&[u8]) -> T) -> Vec<T> {
    bytes.chunks_exact(width).map(read).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value, logical: usize) {
        let ty = value.column_type();
        let mut buf = vec![0u8; physical_size(ty, logical)];
        serialize(&value, ty, logical, "c", &mut buf).unwrap();
        assert_eq!(deserialize(ty, logical, &buf).unwrap(), value);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Boolean(true), 1);
        round_trip(Value::Byte(-7), 1);
        round_trip(Value::Short(-12345), 1);
        round_trip(Value::Int(i32::MIN), 1);
        round_trip(Value::Long(i64::MAX), 1);
        round_trip(Value::Float(std::f32::consts::PI), 1);
        round_trip(Value::Double(-0.25), 1);
        round_trip(Value::Complex32(Complex32::new(1.5, -2.5)), 1);
        round_trip(Value::Complex64(Complex64::new(-1e300, 1e-300)), 1);
    }

    #[test]
    fn strings_round_trip_inside_logical_size() {
        round_trip(Value::String("hello".into()), 16);
        round_trip(Value::String(String::new()), 16);
        round_trip(Value::String("exactly!".into()), 8);
    }

    #[test]
    fn vectors_round_trip_and_match_size_law() {
        round_trip(Value::IntVector(vec![1, -2, 3]), 3);
        round_trip(Value::LongVector(vec![i64::MIN, 0, i64::MAX]), 3);
        round_trip(Value::FloatVector((0..64).map(|i| i as f32).collect()), 64);
        round_trip(Value::DoubleVector(vec![0.5; 128]), 128);
        round_trip(
            Value::Complex32Vector(vec![Complex32::new(1.0, 2.0); 4]),
            4,
        );
        round_trip(
            Value::Complex64Vector(vec![Complex64::new(-1.0, 0.5); 2]),
            2,
        );
        round_trip(
            Value::BooleanVector(BitVector::from_bits(&[true, false, true])),
            3,
        );

        assert_eq!(physical_size(ColumnType::FloatVector, 64), 64 * 4);
        assert_eq!(physical_size(ColumnType::DoubleVector, 128), 128 * 8);
        assert_eq!(physical_size(ColumnType::BooleanVector, 3), 8);
    }

    #[test]
    fn type_mismatch_is_rejected_before_writing() {
        let mut buf = vec![0xFFu8; physical_size(ColumnType::Int, 1)];
        let err = serialize(&Value::Long(1), ColumnType::Int, 1, "c", &mut buf).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
        assert!(buf.iter().all(|&b| b == 0xFF), "buffer untouched");
    }

    #[test]
    fn wrong_vector_length_is_rejected() {
        let mut buf = vec![0u8; physical_size(ColumnType::FloatVector, 4)];
        let err = serialize(
            &Value::FloatVector(vec![0.0; 3]),
            ColumnType::FloatVector,
            4,
            "v",
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::VectorSizeMismatch { .. }));
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut buf = vec![0u8; physical_size(ColumnType::String, 4)];
        let err = serialize(
            &Value::String("too long".into()),
            ColumnType::String,
            4,
            "s",
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::StringTooLong { .. }));
    }
}
