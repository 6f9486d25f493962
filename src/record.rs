use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::value::{FieldType, FieldValue};

/// One bound field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name, unique within the record
    pub name: String,
    /// Declared type
    pub ty: FieldType,
    /// Part of the key (true) or the data (false)
    pub is_key: bool,
}

/// How the data half of a record is laid out
#[derive(Debug, Clone, PartialEq)]
enum DataLayout {
    /// Typed data fields
    Fields,
    /// One opaque buffer
    Blob(Vec<u8>),
}

/// A typed record bound to a store file's key and data buffers.
///
/// Fields are addressed by ordinal: key fields first in the order they
/// were bound, then data fields. Values start at their type's zero value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<FieldDef>,
    values: Vec<FieldValue>,
    key_count: usize,
    data: DataLayout,
}

impl Default for Record {
    fn default() -> Self {
        Record::new()
    }
}

impl Record {
    /// Record with typed data fields
    pub fn new() -> Self {
        Record {
            fields: Vec::new(),
            values: Vec::new(),
            key_count: 0,
            data: DataLayout::Fields,
        }
    }

    /// Record whose data half is a single blob
    pub fn blob() -> Self {
        Record {
            data: DataLayout::Blob(Vec::new()),
            ..Record::new()
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self.data, DataLayout::Blob(_))
    }

    fn check_name(&self, name: &str) {
        assert!(
            self.field_index(name).is_none(),
            "field {:?} bound twice",
            name
        );
    }

    /// Bind a key field; it follows previously bound key fields.
    ///
    /// # Panics
    ///
    /// Panics if a field named `name` is already bound. Record layouts are
    /// fixed by the caller's code, so a clash is a programming error.
    pub fn bind_key(&mut self, name: &str, ty: FieldType) -> &mut Self {
        self.check_name(name);
        let at = self.key_count;
        self.fields.insert(
            at,
            FieldDef {
                name: name.to_string(),
                ty,
                is_key: true,
            },
        );
        self.values.insert(at, ty.default_value());
        self.key_count += 1;
        self
    }

    /// Bind a data field.
    ///
    /// # Panics
    ///
    /// Panics if a field named `name` is already bound, or if this is a
    /// blob record.
    pub fn bind_data(&mut self, name: &str, ty: FieldType) -> &mut Self {
        assert!(!self.is_blob(), "blob records have no data fields");
        self.check_name(name);
        self.fields.push(FieldDef {
            name: name.to_string(),
            ty,
            is_key: false,
        });
        self.values.push(ty.default_value());
        self
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDef> {
        self.fields.get(idx)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.field_index(name)
            .ok_or_else(|| Error::invalid(format!("no field named {:?}", name)))
    }

    /// Set a field by name, converting to the declared type.
    pub fn set<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> Result<()> {
        let idx = self.index_of(name)?;
        self.set_by_index(idx, value)
    }

    pub fn set_by_index<V: Into<FieldValue>>(&mut self, idx: usize, value: V) -> Result<()> {
        let def = self
            .fields
            .get(idx)
            .ok_or_else(|| Error::invalid(format!("field index {} out of range", idx)))?;
        self.values[idx] = value.into().convert(def.ty)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.field_index(name).map(|idx| &self.values[idx])
    }

    /// Value of field `idx`; panics when out of range.
    pub fn value(&self, idx: usize) -> &FieldValue {
        &self.values[idx]
    }

    pub fn blob_data(&self) -> &[u8] {
        match &self.data {
            DataLayout::Blob(buf) => buf,
            DataLayout::Fields => &[],
        }
    }

    pub fn set_blob_data(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.data {
            DataLayout::Blob(buf) => {
                buf.clear();
                buf.extend_from_slice(data);
                Ok(())
            }
            DataLayout::Fields => Err(Error::invalid("record has typed data fields, not a blob")),
        }
    }

    /// Reset every data field (or the blob) to empty
    pub fn clear_data(&mut self) {
        for idx in self.key_count..self.fields.len() {
            self.values[idx] = self.fields[idx].ty.default_value();
        }
        if let DataLayout::Blob(buf) = &mut self.data {
            buf.clear();
        }
    }

    pub fn pack_key(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for value in &self.values[..self.key_count] {
            value.encode_key(&mut out)?;
        }
        Ok(out)
    }

    pub fn unpack_key(&mut self, buf: &[u8]) -> Result<()> {
        let mut off = 0;
        for idx in 0..self.key_count {
            self.values[idx] = FieldValue::decode_key(self.fields[idx].ty, buf, &mut off)?;
        }
        if off != buf.len() {
            return Err(Error::Corrupted(format!("{} unexpected key bytes", buf.len() - off)));
        }
        Ok(())
    }

    pub fn pack_data(&self) -> Vec<u8> {
        match &self.data {
            DataLayout::Blob(buf) => buf.clone(),
            DataLayout::Fields => {
                let mut out = Vec::new();
                for value in &self.values[self.key_count..] {
                    value.encode_data(&mut out);
                }
                out
            }
        }
    }

    pub fn unpack_data(&mut self, buf: &[u8]) -> Result<()> {
        if let DataLayout::Blob(blob) = &mut self.data {
            blob.clear();
            blob.extend_from_slice(buf);
            return Ok(());
        }
        let mut off = 0;
        for idx in self.key_count..self.fields.len() {
            self.values[idx] = FieldValue::decode_data(self.fields[idx].ty, buf, &mut off)?;
        }
        if off != buf.len() {
            return Err(Error::Corrupted(format!("{} unexpected data bytes", buf.len() - off)));
        }
        Ok(())
    }

    /// Convert leading key values to the key fields' declared types.
    pub fn convert_key_prefix(&self, values: &[FieldValue]) -> Result<Vec<FieldValue>> {
        if values.len() > self.key_count {
            return Err(Error::invalid(format!(
                "{} key values given, record has {} key fields",
                values.len(),
                self.key_count
            )));
        }
        values
            .iter()
            .zip(&self.fields)
            .map(|(value, def)| value.convert(def.ty))
            .collect()
    }

    /// Encode leading key values as a seek prefix.
    pub fn encode_key_prefix(&self, values: &[FieldValue]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for value in self.convert_key_prefix(values)? {
            value.encode_key(&mut out)?;
        }
        Ok(out)
    }

    /// Compare the current key's leading fields with `values`.
    pub fn compare_key_prefix(&self, values: &[FieldValue]) -> Result<Ordering> {
        for (idx, value) in self.convert_key_prefix(values)?.iter().enumerate() {
            match self.values[idx].compare(value)? {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }
}
