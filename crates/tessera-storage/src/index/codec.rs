//! Order-preserving key encoding.
//!
//! A key is the concatenation of one self-delimiting segment per indexed
//! column, so unsigned byte comparison of two keys orders them the same way
//! as comparing the typed values column by column.
//!
//! Segment layout for an ascending column:
//! ```text
//! null      : 0x00
//! non-null  : 0x7F <payload>
//! ```
//! Payloads:
//! - integers: big-endian with the sign bit flipped
//! - doubles: IEEE bits, all bits flipped for negatives, sign bit set otherwise
//! - text: collation-folded UTF-8, escaped (0x00 -> 0x00 0xFF), ended by 0x00 0x01
//! - binary: escaped like text, no folding
//!
//! A descending column stores the bitwise complement of its ascending segment.

use super::constants::{ESCAPE, ESCAPED_ZERO, NULL_MARKER, TERMINATOR, VALUE_MARKER};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tessera_common::{Collation, DataType, Result, TesseraError, Value};

/// One column of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub data_type: DataType,
    pub ascending: bool,
}

impl IndexColumn {
    pub fn ascending(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            ascending: true,
        }
    }

    pub fn descending(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            ascending: false,
        }
    }
}

/// Encodes column values into sortable keys and back.
#[derive(Debug, Clone)]
pub struct EntryCodec {
    columns: Vec<IndexColumn>,
    collation: Collation,
    max_key_size: usize,
}

impl EntryCodec {
    /// Creates a codec for the given key columns.
    pub fn new(columns: Vec<IndexColumn>, collation: Collation, max_key_size: usize) -> Self {
        Self {
            columns,
            collation,
            max_key_size,
        }
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    /// Encodes a full key. `values` must hold one value per key column.
    pub fn encode(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(TesseraError::InvalidArgument(format!(
                "expected {} key values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        self.encode_prefix(values)
    }

    /// Encodes the leading key columns only.
    ///
    /// Every full key whose leading columns equal `values` starts with the
    /// returned bytes.
    pub fn encode_prefix(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() > self.columns.len() {
            return Err(TesseraError::InvalidArgument(format!(
                "index has {} columns, got {} values",
                self.columns.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(values.len() * 9);
        for (column, value) in self.columns.iter().zip(values) {
            let start = buf.len();
            self.encode_value(&mut buf, column, value)?;
            if !column.ascending {
                for byte in &mut buf[start..] {
                    *byte = !*byte;
                }
            }
        }

        if buf.len() > self.max_key_size {
            return Err(TesseraError::KeyTooLarge {
                size: buf.len(),
                max: self.max_key_size,
            });
        }
        Ok(buf.to_vec())
    }

    fn encode_value(&self, buf: &mut BytesMut, column: &IndexColumn, value: &Value) -> Result<()> {
        let value = value.coerce_to(column.data_type).ok_or_else(|| {
            TesseraError::Encoding(format!(
                "cannot encode {:?} as {} for column {}",
                value, column.data_type, column.name
            ))
        })?;

        match value {
            Value::Null => {
                buf.put_u8(NULL_MARKER);
                return Ok(());
            }
            _ => buf.put_u8(VALUE_MARKER),
        }

        match value {
            Value::Null => {}
            Value::Boolean(b) => buf.put_u8(b as u8),
            Value::Byte(v) => buf.put_u8(v),
            Value::Int(v) => buf.put_u16((v as u16) ^ 0x8000),
            Value::Long(v) => buf.put_u32((v as u32) ^ 0x8000_0000),
            Value::BigInt(v) | Value::DateTime(v) => buf.put_u64((v as u64) ^ (1 << 63)),
            Value::Double(v) => buf.put_u64(order_double(v)),
            Value::Text(s) => put_escaped(buf, fold_text(&s, self.collation).as_bytes()),
            Value::Binary(b) => put_escaped(buf, &b),
        }
        Ok(())
    }

    /// Decodes a full key back into values.
    ///
    /// Text comes back in its collation-folded form.
    pub fn decode(&self, key: &[u8]) -> Result<Vec<Value>> {
        let mut reader = KeyReader { key, pos: 0, mask: 0 };
        let mut values = Vec::with_capacity(self.columns.len());

        for column in &self.columns {
            reader.mask = if column.ascending { 0 } else { 0xFF };
            values.push(reader.read_value(column.data_type)?);
        }

        if reader.pos != key.len() {
            return Err(TesseraError::Encoding(format!(
                "{} trailing bytes after key",
                key.len() - reader.pos
            )));
        }
        Ok(values)
    }
}

/// Maps a double onto a u64 whose unsigned order matches numeric order.
fn order_double(v: f64) -> u64 {
    // -0.0 and 0.0 must encode equally.
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = v.to_bits();
    if bits >> 63 == 1 { !bits } else { bits | (1 << 63) }
}

fn unorder_double(ordered: u64) -> f64 {
    let bits = if ordered >> 63 == 1 {
        ordered & !(1 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

fn put_escaped(buf: &mut BytesMut, bytes: &[u8]) {
    for &b in bytes {
        if b == ESCAPE {
            buf.put_u8(ESCAPE);
            buf.put_u8(ESCAPED_ZERO);
        } else {
            buf.put_u8(b);
        }
    }
    buf.put_u8(ESCAPE);
    buf.put_u8(TERMINATOR);
}

/// Folds text for comparison under `collation`.
///
/// General collation lowercases and drops accents from Latin letters, so
/// "Élan" and "elan" produce the same key.
pub fn fold_text(text: &str, collation: Collation) -> String {
    match collation {
        Collation::Binary => text.to_string(),
        Collation::General => text
            .chars()
            .flat_map(char::to_lowercase)
            .map(strip_accent)
            .collect(),
    }
}

fn strip_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

struct KeyReader<'a> {
    key: &'a [u8],
    pos: usize,
    mask: u8,
}

impl KeyReader<'_> {
    fn byte(&mut self) -> Result<u8> {
        let b = self
            .key
            .get(self.pos)
            .ok_or_else(|| TesseraError::Encoding("truncated key".to_string()))?;
        self.pos += 1;
        Ok(b ^ self.mask)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        for b in &mut out {
            *b = self.byte()?;
        }
        Ok(out)
    }

    fn escaped(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.byte()? {
                ESCAPE => match self.byte()? {
                    ESCAPED_ZERO => out.push(0),
                    TERMINATOR => return Ok(out),
                    other => {
                        return Err(TesseraError::Encoding(format!(
                            "bad escape 0x{:02x} in key",
                            other
                        )));
                    }
                },
                b => out.push(b),
            }
        }
    }

    fn read_value(&mut self, data_type: DataType) -> Result<Value> {
        match self.byte()? {
            NULL_MARKER => return Ok(Value::Null),
            VALUE_MARKER => {}
            other => {
                return Err(TesseraError::Encoding(format!(
                    "bad column marker 0x{:02x}",
                    other
                )));
            }
        }

        let value = match data_type {
            DataType::Boolean => Value::Boolean(self.byte()? != 0),
            DataType::Byte => Value::Byte(self.byte()?),
            DataType::Int => Value::Int((u16::from_be_bytes(self.array()?) ^ 0x8000) as i16),
            DataType::Long => {
                Value::Long((u32::from_be_bytes(self.array()?) ^ 0x8000_0000) as i32)
            }
            DataType::BigInt => {
                Value::BigInt((u64::from_be_bytes(self.array()?) ^ (1 << 63)) as i64)
            }
            DataType::DateTime => {
                Value::DateTime((u64::from_be_bytes(self.array()?) ^ (1 << 63)) as i64)
            }
            DataType::Double => Value::Double(unorder_double(u64::from_be_bytes(self.array()?))),
            DataType::Text => {
                let raw = self.escaped()?;
                Value::Text(String::from_utf8(raw).map_err(|e| {
                    TesseraError::Encoding(format!("key text is not UTF-8: {}", e))
                })?)
            }
            DataType::Binary => Value::Binary(self.escaped()?),
        };
        Ok(value)
    }
}
