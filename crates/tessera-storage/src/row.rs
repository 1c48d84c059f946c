//! Row identity, row values, and the row codec.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_common::{DataType, PageId, Result, TesseraError, Value};

/// Physical location of a row.
///
/// `First` sorts before and `Last` after every real location, so the two
/// sentinels can bound searches over (key, row) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowId {
    First,
    At { page: PageId, slot: u16 },
    Last,
}

impl RowId {
    /// Size of a real RowId on disk.
    pub const SIZE: usize = 6;

    /// Creates a RowId for a real row.
    pub fn new(page: PageId, slot: u16) -> Self {
        RowId::At { page, slot }
    }

    /// Returns true unless this is a sentinel.
    pub fn is_valid(&self) -> bool {
        matches!(self, RowId::At { .. })
    }

    /// Page holding the row, None for sentinels.
    pub fn page(&self) -> Option<PageId> {
        match self {
            RowId::At { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Slot within the page, None for sentinels.
    pub fn slot(&self) -> Option<u16> {
        match self {
            RowId::At { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Writes a real RowId big-endian so that byte order matches RowId order.
    pub fn put(&self, buf: &mut impl BufMut) -> Result<()> {
        match self {
            RowId::At { page, slot } => {
                buf.put_u32(page.0);
                buf.put_u16(*slot);
                Ok(())
            }
            other => Err(TesseraError::Internal(format!(
                "sentinel {} cannot be stored",
                other
            ))),
        }
    }

    /// Reads a RowId written by [`RowId::put`].
    pub fn get(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }
        let page = PageId(buf.get_u32());
        let slot = buf.get_u16();
        Some(RowId::At { page, slot })
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowId::First => write!(f, "FIRST"),
            RowId::At { page, slot } => write!(f, "{}:{}", page.0, slot),
            RowId::Last => write!(f, "LAST"),
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Null is rejected when set.
    #[serde(default)]
    pub required: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
        }
    }

    /// Marks the column as required (not null).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A decoded row: column values keyed by column name.
///
/// Equality compares values only, so a row built by hand equals the same
/// row read back from a table.
#[derive(Debug, Clone)]
pub struct Row {
    id: RowId,
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row at `id`.
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    /// Builds a detached row from (column, value) pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new(RowId::First);
        for (k, v) in pairs {
            row.values.insert(k.into(), v.into());
        }
        row
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in sorted order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keeps only the named columns.
    pub fn retain_columns(&mut self, columns: &[String]) {
        self.values.retain(|k, _| columns.iter().any(|c| c == k));
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

/// Encodes and decodes whole rows for a fixed column list.
///
/// Layout: a u16 column count, then per column a presence byte (0 = null)
/// followed by the value, little-endian for fixed-size types and u16
/// length-prefixed for text and binary.
#[derive(Debug, Clone)]
pub struct RowCodec {
    columns: Vec<Column>,
}

impl RowCodec {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| TesseraError::ColumnNotFound(name.to_string()))
    }

    /// Converts caller values to the declared column types.
    pub fn coerce_row(&self, values: &[Value]) -> Result<Vec<Value>> {
        if values.len() != self.columns.len() {
            return Err(TesseraError::InvalidArgument(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                value.coerce_to(column.data_type).ok_or_else(|| {
                    TesseraError::Encoding(format!(
                        "cannot store {} in {} column {}",
                        value, column.data_type, column.name
                    ))
                })
            })
            .collect()
    }

    /// Encodes one value per column, in column order.
    pub fn encode_row(&self, values: &[Value]) -> Result<Vec<u8>> {
        let values = self.coerce_row(values)?;
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16_le(self.columns.len() as u16);

        for value in &values {
            if value.is_null() {
                buf.put_u8(0);
                continue;
            }
            buf.put_u8(1);
            match value {
                Value::Null => {}
                Value::Boolean(b) => buf.put_u8(*b as u8),
                Value::Byte(v) => buf.put_u8(*v),
                Value::Int(v) => buf.put_i16_le(*v),
                Value::Long(v) => buf.put_i32_le(*v),
                Value::BigInt(v) | Value::DateTime(v) => buf.put_i64_le(*v),
                Value::Double(v) => buf.put_f64_le(*v),
                Value::Text(s) => put_var(&mut buf, s.as_bytes())?,
                Value::Binary(b) => put_var(&mut buf, b)?,
            }
        }
        Ok(buf.to_vec())
    }

    /// Decodes the named columns (all columns when `wanted` is None).
    /// Unwanted columns are skipped without validating their content.
    pub fn decode_row(&self, row_id: RowId, raw: &[u8], wanted: Option<&[String]>) -> Result<Row> {
        let fault = |reason: String| TesseraError::RowDecode {
            row: row_id.to_string(),
            reason,
        };

        let mut buf = raw;
        if buf.remaining() < 2 {
            return Err(fault("missing column count".to_string()));
        }
        let stored = buf.get_u16_le() as usize;
        if stored > self.columns.len() {
            return Err(fault(format!(
                "row has {} columns, table has {}",
                stored,
                self.columns.len()
            )));
        }

        let mut row = Row::new(row_id);
        for (i, column) in self.columns.iter().enumerate() {
            let want = wanted.is_none_or(|w| w.iter().any(|c| *c == column.name));
            if i >= stored {
                if want {
                    row.insert(column.name.clone(), Value::Null);
                }
                continue;
            }

            if !buf.has_remaining() {
                return Err(fault(format!("truncated at column {}", column.name)));
            }
            let value = match buf.get_u8() {
                0 => Value::Null,
                1 => read_value(&mut buf, column.data_type, want)
                    .map_err(|reason| fault(format!("column {}: {}", column.name, reason)))?,
                tag => return Err(fault(format!("bad presence byte {} for {}", tag, column.name))),
            };
            if want {
                row.insert(column.name.clone(), value);
            }
        }
        Ok(row)
    }
}

fn put_var(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        TesseraError::Encoding(format!("value of {} bytes is too long", bytes.len()))
    })?;
    buf.put_u16_le(len);
    buf.put_slice(bytes);
    Ok(())
}

fn read_value(buf: &mut &[u8], ty: DataType, want: bool) -> std::result::Result<Value, String> {
    let need = |have: usize, n: usize| {
        if have < n {
            Err(format!("need {} bytes, have {}", n, have))
        } else {
            Ok(())
        }
    };

    if let Some(size) = ty.fixed_size() {
        need(buf.remaining(), size)?;
    }
    let fixed = match ty {
        DataType::Boolean => Some(Value::Boolean(buf.get_u8() != 0)),
        DataType::Byte => Some(Value::Byte(buf.get_u8())),
        DataType::Int => Some(Value::Int(buf.get_i16_le())),
        DataType::Long => Some(Value::Long(buf.get_i32_le())),
        DataType::BigInt => Some(Value::BigInt(buf.get_i64_le())),
        DataType::DateTime => Some(Value::DateTime(buf.get_i64_le())),
        DataType::Double => Some(Value::Double(buf.get_f64_le())),
        DataType::Text | DataType::Binary => None,
    };
    if let Some(value) = fixed {
        return Ok(value);
    }

    need(buf.remaining(), 2)?;
    let len = buf.get_u16_le() as usize;
    need(buf.remaining(), len)?;
    let bytes = &buf[..len];
    let value = if !want {
        Value::Null
    } else if ty == DataType::Text {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("invalid text: {}", e))?;
        Value::Text(text.to_string())
    } else {
        Value::Binary(bytes.to_vec())
    };
    buf.advance(len);
    Ok(value)
}
