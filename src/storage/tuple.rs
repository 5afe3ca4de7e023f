use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::RecordId;
use crate::storage::page::PageError;

/// Maximum stored bytes of a Text field. Longer strings are rejected at
/// construction; shorter ones are zero-padded on the page.
pub const TEXT_CAPACITY: usize = 32;

/// Field types supported by the tuple codec. Both are fixed-width on the page
/// so that slot arithmetic stays trivial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Text,
}

impl FieldType {
    /// On-page width of one field of this type.
    pub fn byte_size(&self) -> usize {
        match self {
            FieldType::Int => 8,
            // u32 length prefix + padded body
            FieldType::Text => 4 + TEXT_CAPACITY,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i64),
    Text(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Text(_) => FieldType::Text,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Schema of a tuple: an ordered list of field types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    fields: Vec<FieldType>,
}

impl TupleDesc {
    pub fn new(fields: Vec<FieldType>) -> Self {
        Self { fields }
    }

    /// Convenience schema of `n` Int columns.
    pub fn ints(n: usize) -> Self {
        Self::new(vec![FieldType::Int; n])
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.fields[i]
    }

    /// On-page width of one tuple under this schema.
    pub fn byte_size(&self) -> usize {
        self.fields.iter().map(|f| f.byte_size()).sum()
    }
}

/// A tuple: values conforming to a TupleDesc, plus the page/slot it lives in
/// once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Result<Self, PageError> {
        if fields.len() != desc.num_fields() {
            return Err(PageError::SchemaMismatch);
        }
        for (i, field) in fields.iter().enumerate() {
            if field.field_type() != desc.field_type(i) {
                return Err(PageError::SchemaMismatch);
            }
            if let Field::Text(s) = field {
                if s.len() > TEXT_CAPACITY {
                    return Err(PageError::TextTooLong(s.len()));
                }
            }
        }
        Ok(Self { desc, fields, record_id: None })
    }

    /// Convenience constructor for an all-Int tuple.
    pub fn from_ints(values: &[i64]) -> Self {
        let desc = TupleDesc::ints(values.len());
        let fields = values.iter().map(|&v| Field::Int(v)).collect();
        Self { desc, fields, record_id: None }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Encode this tuple into `buf`, which must be exactly
    /// `desc.byte_size()` bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.desc.byte_size());
        let mut off = 0;
        for field in &self.fields {
            match field {
                Field::Int(v) => {
                    LittleEndian::write_i64(&mut buf[off..off + 8], *v);
                    off += 8;
                }
                Field::Text(s) => {
                    LittleEndian::write_u32(&mut buf[off..off + 4], s.len() as u32);
                    off += 4;
                    buf[off..off + s.len()].copy_from_slice(s.as_bytes());
                    buf[off + s.len()..off + TEXT_CAPACITY].fill(0);
                    off += TEXT_CAPACITY;
                }
            }
        }
    }

    /// Decode one tuple from `buf` under `desc`.
    pub fn read_from(desc: &TupleDesc, buf: &[u8]) -> Result<Self, PageError> {
        debug_assert_eq!(buf.len(), desc.byte_size());
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut off = 0;
        for i in 0..desc.num_fields() {
            match desc.field_type(i) {
                FieldType::Int => {
                    fields.push(Field::Int(LittleEndian::read_i64(&buf[off..off + 8])));
                    off += 8;
                }
                FieldType::Text => {
                    let len = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
                    off += 4;
                    if len > TEXT_CAPACITY {
                        return Err(PageError::TextTooLong(len));
                    }
                    let s = std::str::from_utf8(&buf[off..off + len])
                        .map_err(|_| PageError::CorruptTuple)?
                        .to_string();
                    fields.push(Field::Text(s));
                    off += TEXT_CAPACITY;
                }
            }
        }
        Ok(Self { desc: desc.clone(), fields, record_id: None })
    }
}
