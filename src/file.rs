use log::debug;

use crate::constants::{DbFlags, WriteFlags};
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result, Status};
use crate::record::Record;
use crate::transaction::Transaction;

/// A database whose rows are described by a `Record`.
///
/// The record holds the "current" field values: `insert`/`update` write
/// them, `fetch` and cursors read rows into them.
#[derive(Debug)]
pub struct RecordFile {
    db: Database,
    record: Record,
}

impl RecordFile {
    pub fn open(env: &Environment, name: &str, record: Record, flags: DbFlags) -> Result<Self> {
        if record.key_count() == 0 {
            return Err(Error::invalid(format!("record for {} has no key fields", name)));
        }
        let db = env.open_db(name, flags)?;
        debug!("opened record file {} ({} fields)", name, record.field_count());
        Ok(RecordFile { db, record })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Load a row (key and data) into the record.
    pub(crate) fn load(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        self.record.unpack_key(key)?;
        self.record.unpack_data(data)
    }

    /// Insert the current record. Returns `KeyDup` if the key exists and the
    /// file does not allow duplicates (or the exact row already exists).
    pub fn insert(&mut self, txn: Option<&Transaction>) -> Result<Status> {
        let key = self.record.pack_key()?;
        let data = self.record.pack_data();
        let flags = if self.db.is_dupsort() {
            WriteFlags::NODUPDATA
        } else {
            WriteFlags::NOOVERWRITE
        };
        match self.db.put(txn, &key, &data, flags) {
            Ok(()) => Ok(Status::Ok),
            Err(Error::KeyExist) => Ok(Status::KeyDup),
            Err(e) => Err(e),
        }
    }

    /// Write the current record, replacing the row with the same key.
    pub fn update(&mut self, txn: Option<&Transaction>) -> Result<()> {
        let key = self.record.pack_key()?;
        let data = self.record.pack_data();
        self.db.put(txn, &key, &data, WriteFlags::empty())
    }

    /// Read the row matching the record's current key fields.
    pub fn fetch(&mut self, txn: Option<&Transaction>) -> Result<Status> {
        let key = self.record.pack_key()?;
        match self.db.get(txn, &key)? {
            Some(data) => {
                self.record.unpack_data(&data)?;
                Ok(Status::Ok)
            }
            None => Ok(Status::NotFound),
        }
    }

    /// Delete every row under the record's current key.
    pub fn delete(&mut self, txn: Option<&Transaction>) -> Result<Status> {
        let key = self.record.pack_key()?;
        Ok(if self.db.del(txn, &key, None)? {
            Status::Ok
        } else {
            Status::NotFound
        })
    }

    /// Store `data` as the blob of the row under the current key.
    pub fn update_blob(&mut self, txn: Option<&Transaction>, data: &[u8]) -> Result<()> {
        self.record.set_blob_data(data)?;
        self.update(txn)
    }

    /// Number of rows
    pub fn len(&self, txn: Option<&Transaction>) -> Result<usize> {
        self.db.len(txn)
    }

    pub fn is_empty(&self, txn: Option<&Transaction>) -> Result<bool> {
        self.db.is_empty(txn)
    }
}
