//! Canonical row encoding: the exact bytes fed to every row hash.
//!
//! Per column, in canonical (name-sorted) order: a one-byte type tag followed by
//! the value encoding.
//!
//! | value     | tag  | encoding                                        |
//! |-----------|------|-------------------------------------------------|
//! | null      | 0x00 | tag only                                        |
//! | bool      | 0x01 | one byte, 0 or 1                                |
//! | integer   | 0x02 | i64 big-endian (i32 is widened)                 |
//! | float     | 0x03 | f64 bit pattern big-endian, NaN canonicalized   |
//! | string    | 0x04 | u64 big-endian byte length + UTF-8 bytes        |
//! | bytes     | 0x05 | u64 big-endian length + raw bytes               |
//! | timestamp | 0x06 | i64 big-endian microseconds since epoch         |
//!
//! Widening keeps the encoding independent of the source engine's integer or
//! float width, so identical content hashes identically across engines.

use crate::schema::Schema;
use crate::types::Scalar;

pub const TAG_NULL: u8 = 0x00;
pub const TAG_BOOL: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_FLOAT: u8 = 0x03;
pub const TAG_STR: u8 = 0x04;
pub const TAG_BYTES: u8 = 0x05;
pub const TAG_TIMESTAMP: u8 = 0x06;

/// The single bit pattern every NaN is encoded as.
pub const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

#[inline]
fn float_bits(x: f64) -> u64 {
    if x.is_nan() {
        CANONICAL_NAN_BITS
    } else {
        x.to_bits()
    }
}

/// Append the canonical encoding of one scalar.
pub fn encode_scalar(v: &Scalar, out: &mut Vec<u8>) {
    match v {
        Scalar::Null => out.push(TAG_NULL),
        Scalar::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Scalar::I32(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i64::from(*i).to_be_bytes());
        }
        Scalar::I64(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Scalar::F32(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&float_bits(f64::from(*x)).to_be_bytes());
        }
        Scalar::F64(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&float_bits(*x).to_be_bytes());
        }
        Scalar::Str(s) => {
            out.push(TAG_STR);
            out.extend_from_slice(&(s.len() as u64).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Scalar::Bin(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u64).to_be_bytes());
            out.extend_from_slice(b);
        }
        Scalar::Timestamp(us) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&us.to_be_bytes());
        }
    }
}

/// Append the encoding of `row[idx]` for each `idx` in `order`.
///
/// `order` must come from `canonical_order` (or a subset of it) so the byte
/// layout never depends on how the source engine ordered its columns.
pub fn encode_row(row: &[Scalar], order: &[usize], out: &mut Vec<u8>) {
    for &idx in order {
        match row.get(idx) {
            Some(v) => encode_scalar(v, out),
            None => out.push(TAG_NULL),
        }
    }
}

pub fn encode_row_to_vec(row: &[Scalar], order: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(order.len() * 9);
    encode_row(row, order, &mut out);
    out
}

/// Column indices of `schema`, sorted by column name.
pub fn canonical_order(schema: &Schema) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..schema.fields.len()).collect();
    idx.sort_by(|&a, &b| schema.fields[a].name.cmp(&schema.fields[b].name));
    idx
}

/// Canonical indices of the named columns, ordered by name. Unknown names are skipped;
/// callers validate presence beforehand.
pub fn canonical_order_of(schema: &Schema, columns: &[String]) -> Vec<usize> {
    let mut names: Vec<&String> = columns.iter().collect();
    names.sort();
    names.dedup();
    names
        .into_iter()
        .filter_map(|n| schema.index_of(n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};

    #[test]
    fn integer_widths_encode_identically() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode_scalar(&Scalar::I32(-7), &mut a);
        encode_scalar(&Scalar::I64(-7), &mut b);
        assert_eq!(a, b);
        assert_eq!(a[0], TAG_INT);
        assert_eq!(&a[1..], &(-7i64).to_be_bytes());
    }

    #[test]
    fn nan_payloads_are_canonicalized() {
        let quiet = f64::NAN;
        let other = f64::from_bits(0x7ff0_0000_0000_0001);
        assert!(other.is_nan());
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode_scalar(&Scalar::F64(quiet), &mut a);
        encode_scalar(&Scalar::F64(other), &mut b);
        assert_eq!(a, b);
        assert_eq!(&a[1..], &CANONICAL_NAN_BITS.to_be_bytes());
    }

    #[test]
    fn strings_are_length_prefixed() {
        // ("ab","c") must not collide with ("a","bc").
        let order = [0usize, 1];
        let x = encode_row_to_vec(&[Scalar::Str("ab".into()), Scalar::Str("c".into())], &order);
        let y = encode_row_to_vec(&[Scalar::Str("a".into()), Scalar::Str("bc".into())], &order);
        assert_ne!(x, y);
    }

    #[test]
    fn null_is_tag_only() {
        let mut out = Vec::new();
        encode_scalar(&Scalar::Null, &mut out);
        assert_eq!(out, vec![TAG_NULL]);
    }

    #[test]
    fn canonical_order_sorts_by_name() {
        let s = Schema::new(vec![
            Field::new("z", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
            Field::new("m", DataType::Int64, false),
        ]);
        assert_eq!(canonical_order(&s), vec![1, 2, 0]);
        assert_eq!(
            canonical_order_of(&s, &["z".into(), "a".into()]),
            vec![1, 0]
        );
    }
}
