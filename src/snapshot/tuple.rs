//! Order-preserving binary tuples.
//!
//! Each field is a one-byte tag followed by its payload. Byte-wise comparison
//! of two encoded tuples matches field-wise comparison of their values within
//! a type, so snapshots can keep rows in a plain `BTreeMap` keyed by the
//! encoded primary key.
//!
//! - integers are big-endian with the sign bit flipped
//! - floats flip the sign bit when positive and every bit when negative
//! - text and json escape `0x00` as `0x00 0xff` and end with `0x00 0x00`

use std::fmt;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::catalog::DataType;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_UINT: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_TEXT: u8 = 0x06;
const TAG_JSON: u8 = 0x07;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleError {
    #[error("unknown field tag {tag:#04x} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("tuple truncated at byte {0}")]
    Truncated(usize),

    #[error("invalid utf-8 in text field")]
    InvalidUtf8,

    #[error("invalid json field: {0}")]
    InvalidJson(String),

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("keyless row value has no cardinality")]
    MissingCardinality,
}

pub type TupleResult<T> = Result<T, TupleError>;

/// An encoded tuple. Ordering is byte-wise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tuple(Vec<u8>);

impl Tuple {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn builder() -> TupleBuilder {
        TupleBuilder::default()
    }

    /// decode every field
    pub fn fields(&self) -> TupleResult<Vec<Value>> {
        let mut reader = TupleReader::new(&self.0);
        let mut out = Vec::new();
        while let Some(value) = reader.next_field()? {
            out.push(value);
        }
        Ok(out)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Default)]
pub struct TupleBuilder {
    buf: Vec<u8>,
}

impl TupleBuilder {
    pub fn push(mut self, value: &Value) -> Self {
        encode_value(&mut self.buf, value);
        self
    }

    pub fn push_uint(mut self, n: u64) -> Self {
        self.buf.push(TAG_UINT);
        self.buf.extend_from_slice(&n.to_be_bytes());
        self
    }

    pub fn build(self) -> Tuple {
        Tuple(self.buf)
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(false) => buf.push(TAG_FALSE),
        Value::Bool(true) => buf.push(TAG_TRUE),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                buf.push(TAG_INT);
                buf.extend_from_slice(&((i as u64) ^ (1 << 63)).to_be_bytes());
            } else if let Some(u) = n.as_u64() {
                buf.push(TAG_UINT);
                buf.extend_from_slice(&u.to_be_bytes());
            } else {
                let bits = n.as_f64().unwrap_or_default().to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                buf.push(TAG_FLOAT);
                buf.extend_from_slice(&ordered.to_be_bytes());
            }
        }
        Value::String(s) => {
            buf.push(TAG_TEXT);
            encode_escaped(buf, s.as_bytes());
        }
        other => {
            buf.push(TAG_JSON);
            encode_escaped(buf, other.to_string().as_bytes());
        }
    }
}

fn encode_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        buf.push(b);
        if b == 0x00 {
            buf.push(0xff);
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}

/// Sequential field decoder over an encoded tuple.
pub struct TupleReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> TupleReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> TupleResult<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .input
            .get(self.pos..end)
            .ok_or(TupleError::Truncated(self.input.len()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_escaped(&mut self) -> TupleResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let [b] = self.take::<1>()?;
            if b != 0x00 {
                out.push(b);
                continue;
            }
            match self.take::<1>()? {
                [0x00] => return Ok(out),
                [0xff] => out.push(0x00),
                [tag] => {
                    return Err(TupleError::UnknownTag {
                        tag,
                        offset: self.pos - 1,
                    })
                }
            }
        }
    }

    /// next decoded field, `None` at the end of the tuple
    pub fn next_field(&mut self) -> TupleResult<Option<Value>> {
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let offset = self.pos;
        let [tag] = self.take::<1>()?;

        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => {
                let raw = u64::from_be_bytes(self.take::<8>()?);
                Value::from((raw ^ (1 << 63)) as i64)
            }
            TAG_UINT => Value::from(u64::from_be_bytes(self.take::<8>()?)),
            TAG_FLOAT => {
                let raw = u64::from_be_bytes(self.take::<8>()?);
                let bits = if raw >> 63 == 1 { raw ^ (1 << 63) } else { !raw };
                Number::from_f64(f64::from_bits(bits)).map_or(Value::Null, Value::Number)
            }
            TAG_TEXT => {
                let bytes = self.take_escaped()?;
                Value::String(String::from_utf8(bytes).map_err(|_| TupleError::InvalidUtf8)?)
            }
            TAG_JSON => {
                let bytes = self.take_escaped()?;
                serde_json::from_slice(&bytes).map_err(|e| TupleError::InvalidJson(e.to_string()))?
            }
            tag => return Err(TupleError::UnknownTag { tag, offset }),
        };
        Ok(Some(value))
    }
}

/// Describes the fields of a key or value tuple.
///
/// Value tuples of keyless tables start with a cardinality field that is not
/// a column; `offset` counts those leading fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleDesc {
    pub fields: Vec<DataType>,
    pub offset: usize,
}

impl TupleDesc {
    pub fn new(fields: Vec<DataType>) -> Self {
        Self { fields, offset: 0 }
    }

    pub fn keyless_value(fields: Vec<DataType>) -> Self {
        Self { fields, offset: 1 }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// decode the column fields, skipping leading non-column fields
    pub fn decode(&self, tuple: &Tuple) -> TupleResult<Vec<Value>> {
        let mut all = tuple.fields()?;
        let expected = self.offset + self.fields.len();
        if all.len() != expected {
            return Err(TupleError::FieldCount {
                expected,
                found: all.len(),
            });
        }
        Ok(all.split_off(self.offset))
    }
}

/// the leading row count of a keyless value tuple
pub fn cardinality(value: &Tuple) -> TupleResult<u64> {
    match TupleReader::new(value.as_bytes()).next_field()? {
        Some(Value::Number(n)) => n.as_u64().ok_or(TupleError::MissingCardinality),
        _ => Err(TupleError::MissingCardinality),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(value: Value) -> Tuple {
        Tuple::builder().push(&value).build()
    }

    #[test]
    fn test_integer_order() {
        let values = [i64::MIN, -100, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<_> = values.iter().map(|v| key(json!(v))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_float_order() {
        let values = [-1e10, -2.5, -0.5, 0.5, 2.5, 1e10];
        let encoded: Vec<_> = values.iter().map(|v| key(json!(v))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_text_order_with_prefixes() {
        let encoded: Vec<_> = ["", "a", "a\u{0}", "ab", "b"].iter().map(|s| key(json!(s))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_decode_mixed_fields() {
        let tuple = Tuple::builder()
            .push_uint(3)
            .push(&json!(null))
            .push(&json!(true))
            .push(&json!(-7))
            .push(&json!(1.5))
            .push(&json!("nul\u{0}byte"))
            .push(&json!({"a": [1, 2]}))
            .build();

        assert_eq!(
            tuple.fields().unwrap(),
            vec![json!(3), json!(null), json!(true), json!(-7), json!(1.5), json!("nul\u{0}byte"), json!({"a": [1, 2]})]
        );
        assert_eq!(cardinality(&tuple).unwrap(), 3);
    }

    #[test]
    fn test_desc_offset_and_count() {
        let tuple = Tuple::builder().push_uint(2).push(&json!("x")).build();
        let desc = TupleDesc::keyless_value(vec![DataType::Text]);
        assert_eq!(desc.decode(&tuple).unwrap(), vec![json!("x")]);

        let wrong = TupleDesc::new(vec![DataType::Text]);
        assert_eq!(
            wrong.decode(&tuple),
            Err(TupleError::FieldCount { expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(
            Tuple::from_bytes(vec![0x42]).fields(),
            Err(TupleError::UnknownTag { tag: 0x42, offset: 0 })
        );
        assert!(matches!(
            Tuple::from_bytes(vec![TAG_INT, 0x00, 0x01]).fields(),
            Err(TupleError::Truncated(_))
        ));
        assert_eq!(
            Tuple::from_bytes(vec![TAG_TEXT, 0xff, 0xfe, 0x00, 0x00]).fields(),
            Err(TupleError::InvalidUtf8)
        );
        assert!(matches!(
            Tuple::from_bytes(vec![TAG_JSON, b'{', 0x00, 0x00]).fields(),
            Err(TupleError::InvalidJson(_))
        ));
        assert_eq!(
            cardinality(&Tuple::from_bytes(vec![TAG_TEXT, 0x00, 0x00])),
            Err(TupleError::MissingCardinality)
        );
    }
}
