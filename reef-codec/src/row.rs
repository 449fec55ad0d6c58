//! Binary row format (`reef-row-v1`) and the mutation envelope
//!
//! Wire format for entity keys, streaming events and snapshot outputs. The
//! format is schema-bound: payloads carry no field names or types, both
//! sides hold the same `Schema` via serving metadata.
//!
//! ## Row Layout
//!
//! ```text
//! [version u8 = 1] [field_count u16 LE] [presence bitmap ceil(n/8) bytes]
//! [per present field, schema order: type-directed value encoding]
//! ```
//!
//! | Type   | Encoding                                |
//! |--------|-----------------------------------------|
//! | bool   | `u8` (0 or 1)                           |
//! | long   | `i64` LE                                |
//! | double | `f64` LE bits                           |
//! | string | `u32` LE length + UTF-8 bytes           |
//! | bytes  | `u32` LE length + raw                   |
//! | list   | `u32` LE count + element encodings      |
//!
//! A field whose bitmap bit is clear is `Null`; nulls occupy zero payload
//! bytes, so sparse keys stay compact.
//!
//! ## Mutation Envelope
//!
//! Entity mutations prepend `[mutation_ts i64 LE] [is_before u8]` to the
//! row bytes of the value columns.

use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Current row format version.
pub const ROW_VERSION: u8 = 1;

// ============================================================================
// Byte reader
// ============================================================================

/// Cursor over a decode buffer with bounds-checked primitive reads.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated(self.pos + n));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }
}

// ============================================================================
// Type-directed value encoding (row fields)
// ============================================================================

fn write_typed(buf: &mut Vec<u8>, field: &str, dt: &DataType, value: &Value) -> Result<()> {
    if !dt.accepts(value) {
        return Err(Error::type_mismatch(field, dt.type_name(), value.type_name()));
    }
    match (dt, value) {
        (DataType::Bool, Value::Bool(v)) => buf.push(u8::from(*v)),
        (DataType::Long, Value::Long(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (DataType::Double, Value::Double(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (DataType::String, Value::String(s)) => {
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        (DataType::Bytes, Value::Bytes(b)) => {
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        (DataType::List(elem), Value::List(items)) => {
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_typed(buf, field, elem, item)?;
            }
        }
        // accepts() already ruled everything else out
        _ => unreachable!("type-checked above"),
    }
    Ok(())
}

fn read_typed(r: &mut ByteReader<'_>, dt: &DataType) -> Result<Value> {
    Ok(match dt {
        DataType::Bool => Value::Bool(r.u8()? != 0),
        DataType::Long => Value::Long(r.i64()?),
        DataType::Double => Value::Double(r.f64()?),
        DataType::String => {
            let len = r.u32()? as usize;
            let bytes = r.take(len)?;
            Value::String(std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?.to_string())
        }
        DataType::Bytes => {
            let len = r.u32()? as usize;
            Value::Bytes(r.take(len)?.to_vec())
        }
        DataType::List(elem) => {
            let count = r.u32()? as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(read_typed(r, elem)?);
            }
            Value::List(items)
        }
    })
}

// ============================================================================
// Tagged value encoding (IR partials, sampling hash)
// ============================================================================

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;

/// Append the self-describing (tag-prefixed) encoding of a value.
///
/// Used where no schema is in scope: partial-aggregate payloads inside the
/// batch IR, and the byte-order-stable sampling hash.
pub fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Long(v) => {
            buf.push(TAG_LONG);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Double(v) => {
            buf.push(TAG_DOUBLE);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(TAG_STRING);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_value(buf, item);
            }
        }
    }
}

/// Read one tag-prefixed value.
pub(crate) fn read_value(r: &mut ByteReader<'_>) -> Result<Value> {
    let tag = r.u8()?;
    Ok(match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(r.u8()? != 0),
        TAG_LONG => Value::Long(r.i64()?),
        TAG_DOUBLE => Value::Double(r.f64()?),
        TAG_STRING => {
            let len = r.u32()? as usize;
            let bytes = r.take(len)?;
            Value::String(std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?.to_string())
        }
        TAG_BYTES => {
            let len = r.u32()? as usize;
            Value::Bytes(r.take(len)?.to_vec())
        }
        TAG_LIST => {
            let count = r.u32()? as usize;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(read_value(r)?);
            }
            Value::List(items)
        }
        other => return Err(Error::InvalidTag(other)),
    })
}

// ============================================================================
// Row codec
// ============================================================================

/// Schema-bound row codec.
///
/// One instance per role (key codec, streaming value codec, output codec),
/// all sharing the same wire format. Stateless beyond the schema; cheap to
/// clone and safe to share.
#[derive(Clone, Debug)]
pub struct RowCodec {
    schema: Schema,
}

impl RowCodec {
    /// Bind a codec to a schema
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// The bound schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encode values aligned with the schema (index i ↔ field i).
    ///
    /// `Null` entries are recorded as absent in the presence bitmap.
    pub fn encode_values(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.schema.len() {
            return Err(Error::FieldCountMismatch {
                expected: self.schema.len(),
                actual: values.len(),
            });
        }
        let n = self.schema.len();
        let mut buf = Vec::with_capacity(16 + n * 8);
        buf.push(ROW_VERSION);
        buf.extend_from_slice(&(n as u16).to_le_bytes());

        let bitmap_start = buf.len();
        buf.resize(bitmap_start + n.div_ceil(8), 0);
        for (i, (field, value)) in self.schema.fields.iter().zip(values).enumerate() {
            if value.is_null() {
                continue;
            }
            buf[bitmap_start + i / 8] |= 1 << (i % 8);
            write_typed(&mut buf, &field.name, &field.data_type, value)?;
        }
        Ok(buf)
    }

    /// Encode a named row; fields absent from the map encode as `Null`,
    /// map entries without a schema field are ignored.
    pub fn encode_map(&self, row: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
        let values: Vec<Value> = self
            .schema
            .fields
            .iter()
            .map(|f| row.get(&f.name).cloned().unwrap_or(Value::Null))
            .collect();
        self.encode_values(&values)
    }

    /// Decode into values aligned with the schema (`Null` for absent).
    pub fn decode_values(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        let mut r = ByteReader::new(bytes);
        let version = r.u8()?;
        if version != ROW_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let count = r.u16()? as usize;
        if count != self.schema.len() {
            return Err(Error::FieldCountMismatch {
                expected: self.schema.len(),
                actual: count,
            });
        }
        let bitmap = r.take(count.div_ceil(8))?.to_vec();
        let mut values = Vec::with_capacity(count);
        for (i, field) in self.schema.fields.iter().enumerate() {
            let present = bitmap[i / 8] & (1 << (i % 8)) != 0;
            if present {
                values.push(read_typed(&mut r, &field.data_type)?);
            } else {
                values.push(Value::Null);
            }
        }
        if r.remaining() > 0 {
            return Err(Error::TrailingBytes(r.remaining()));
        }
        Ok(values)
    }

    /// Decode into a name→value map (`Null` entries included, so the key
    /// set always equals the schema's field names).
    pub fn decode_map(&self, bytes: &[u8]) -> Result<FxHashMap<String, Value>> {
        let values = self.decode_values(bytes)?;
        Ok(self
            .schema
            .fields
            .iter()
            .zip(values)
            .map(|(f, v)| (f.name.clone(), v))
            .collect())
    }

    /// Decode a streaming event payload: row bytes plus the store timestamp.
    pub fn decode_event(&self, bytes: &[u8], millis: i64) -> Result<StreamingRow> {
        Ok(StreamingRow {
            values: self.decode_values(bytes)?,
            millis,
            is_before: false,
        })
    }
}

// ============================================================================
// Streaming rows and the mutation envelope
// ============================================================================

/// One decoded post-snapshot row.
///
/// For event sources `millis` is the store timestamp and `is_before` is
/// always false. For entity sources both come from the mutation envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamingRow {
    /// Column values aligned with the streaming value schema
    pub values: Vec<Value>,
    /// Event time (events) or mutation time (entities), epoch millis
    pub millis: i64,
    /// Before-image flag; before-images subtract, after-images add
    pub is_before: bool,
}

/// Mutation codec for entity sources.
#[derive(Clone, Debug)]
pub struct MutationCodec {
    row: RowCodec,
}

impl MutationCodec {
    /// Bind a mutation codec to the value-column schema
    pub fn new(schema: Schema) -> Self {
        Self {
            row: RowCodec::new(schema),
        }
    }

    /// The value-column schema
    pub fn schema(&self) -> &Schema {
        self.row.schema()
    }

    /// Encode a mutation: envelope followed by row bytes.
    pub fn encode(&self, values: &[Value], mutation_millis: i64, is_before: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&mutation_millis.to_le_bytes());
        buf.push(u8::from(is_before));
        buf.extend_from_slice(&self.row.encode_values(values)?);
        Ok(buf)
    }

    /// Decode a mutation payload.
    pub fn decode(&self, bytes: &[u8]) -> Result<StreamingRow> {
        let mut r = ByteReader::new(bytes);
        let millis = r.i64()?;
        let is_before = r.u8()? != 0;
        let rest = r.take(r.remaining())?;
        Ok(StreamingRow {
            values: self.row.decode_values(rest)?,
            millis,
            is_before,
        })
    }
}
