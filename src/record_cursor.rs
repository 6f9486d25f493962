use std::cmp::Ordering;

use log::debug;

use crate::cursor::{Cursor, Item};
use crate::error::{Error, Result, Status};
use crate::file::RecordFile;
use crate::record::Record;
use crate::transaction::Transaction;
use crate::types::CursorOp;
use crate::value::FieldValue;

/// Comparison applied by a `from`/`to` bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    NotSet,
    First,
    Last,
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Fetch direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    /// The cursor's configured direction
    Default,
    Forward,
    Backward,
}

/// How fetched rows are locked inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Plain snapshot reads
    ReadUpdate,
    /// Take the write lock on every fetched key (read-modify-write)
    ReadModifyUpdate,
}

/// What happens to the record's data after `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterWrite {
    KeepData,
    DiscardData,
}

/// What `delete` does when there is no row under the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfNotFound {
    /// Return `Error::NotFound`
    Fail,
    /// Return `Status::NotFound`
    Ignore,
}

/// A bound: comparison kind plus the key values accumulated for it
#[derive(Debug, Clone, PartialEq)]
pub struct CondKey {
    cond: Condition,
    values: Vec<FieldValue>,
}

impl CondKey {
    fn new(cond: Condition) -> Self {
        CondKey {
            cond,
            values: Vec::new(),
        }
    }

    fn reset(&mut self, cond: Condition) {
        self.cond = cond;
        self.values.clear();
    }

    /// Append the next key field value, in declared key order.
    pub fn push<V: Into<FieldValue>>(&mut self, value: V) -> &mut Self {
        self.values.push(value.into());
        self
    }

    pub fn condition(&self) -> Condition {
        self.cond
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }
}

/// Cursor over a `RecordFile` positioned by symbolic range conditions.
///
/// Fetched rows are loaded into the file's record. `set_condition` must be
/// called before pushing values into `from()`/`to()`: it clears anything
/// pushed earlier.
#[derive(Debug)]
pub struct RecordCursor<'f> {
    file: &'f mut RecordFile,
    cursor: Option<Cursor>,
    txn: Option<Transaction>,
    from: CondKey,
    to: CondKey,
    direction: FetchDirection,
    lock_mode: LockMode,
    first_fetched: bool,
    eof: bool,
}

impl<'f> RecordCursor<'f> {
    pub fn new(file: &'f mut RecordFile, txn: Option<&Transaction>) -> Result<Self> {
        let cursor = file.database().cursor(txn)?;
        Ok(RecordCursor {
            file,
            cursor: Some(cursor),
            txn: txn.cloned(),
            from: CondKey::new(Condition::First),
            to: CondKey::new(Condition::NotSet),
            direction: FetchDirection::Default,
            lock_mode: LockMode::ReadUpdate,
            first_fetched: false,
            eof: false,
        })
    }

    /// Set the bound kinds, clearing previously pushed bound values and
    /// restarting the scan.
    pub fn set_condition(&mut self, from: Condition, to: Condition) {
        self.from.reset(from);
        self.to.reset(to);
        self.first_fetched = false;
        self.eof = false;
    }

    pub fn from(&mut self) -> &mut CondKey {
        &mut self.from
    }

    pub fn to(&mut self) -> &mut CondKey {
        &mut self.to
    }

    pub fn set_direction(&mut self, direction: FetchDirection) {
        self.direction = direction;
    }

    /// Direction used for `FetchDirection::Default`: backward for `Last`,
    /// `Lt` and `Le` starting bounds unless configured otherwise.
    pub fn direction(&self) -> FetchDirection {
        match self.direction {
            FetchDirection::Default => match self.from.cond {
                Condition::Last | Condition::Lt | Condition::Le => FetchDirection::Backward,
                _ => FetchDirection::Forward,
            },
            configured => configured,
        }
    }

    pub fn set_lock_mode(&mut self, mode: LockMode) {
        self.lock_mode = mode;
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn record(&self) -> &Record {
        self.file.record()
    }

    pub fn record_mut(&mut self) -> &mut Record {
        self.file.record_mut()
    }

    pub fn is_open(&self) -> bool {
        self.cursor.is_some()
    }

    fn store_cursor(&mut self) -> Result<&mut Cursor> {
        self.cursor.as_mut().ok_or(Error::CursorClosed)
    }

    fn seek(&mut self, op: CursorOp, key: Option<&[u8]>) -> Result<Option<Item>> {
        self.store_cursor()?.get(op, key)
    }

    /// Record comparison of the current row's key against the bound's prefix
    fn compare(&self, bound: &CondKey) -> Result<Ordering> {
        self.file.record().compare_key_prefix(&bound.values)
    }

    /// Step forward past rows whose key equals the `from` prefix.
    fn skip_equal(&mut self, mut item: Option<Item>) -> Result<Option<Item>> {
        loop {
            let Some((key, data)) = item.as_ref() else {
                return Ok(None);
            };
            self.file.load(key, data)?;
            if self.compare(&self.from)? != Ordering::Equal {
                return Ok(item);
            }
            item = self.seek(CursorOp::Next, None)?;
        }
    }

    fn position_first(&mut self) -> Result<Option<Item>> {
        let prefix = self.file.record().encode_key_prefix(&self.from.values)?;
        let cond = self.from.cond;
        if prefix.is_empty() {
            return match cond {
                Condition::Last | Condition::Lt | Condition::Le => self.seek(CursorOp::Last, None),
                _ => self.seek(CursorOp::First, None),
            };
        }

        match cond {
            Condition::NotSet | Condition::First => self.seek(CursorOp::First, None),
            Condition::Last => self.seek(CursorOp::Last, None),
            Condition::Eq | Condition::Ge => self.seek(CursorOp::SetRange, Some(&prefix)),
            Condition::Gt => {
                let item = self.seek(CursorOp::SetRange, Some(&prefix))?;
                self.skip_equal(item)
            }
            Condition::Le => {
                let item = self.seek(CursorOp::SetRange, Some(&prefix))?;
                match self.skip_equal(item)? {
                    Some(_) => self.seek(CursorOp::Prev, None),
                    None => self.seek(CursorOp::Last, None),
                }
            }
            Condition::Lt => match self.seek(CursorOp::SetRange, Some(&prefix))? {
                Some(_) => self.seek(CursorOp::Prev, None),
                None => self.seek(CursorOp::Last, None),
            },
        }
    }

    /// Load `item` into the record and check it against the bounds.
    fn accept(&mut self, item: Option<Item>) -> Result<Status> {
        let Some(item) = item else {
            self.eof = true;
            return Ok(Status::NotFound);
        };
        let (key, data) = match (self.lock_mode, self.txn.is_some()) {
            (LockMode::ReadModifyUpdate, true) => match self.store_cursor()?.lock_current()? {
                Some(locked) => locked,
                None => {
                    self.eof = true;
                    return Ok(Status::NotFound);
                }
            },
            _ => item,
        };
        self.file.load(&key, &data)?;

        if !self.in_bounds()? {
            self.eof = true;
            return Ok(Status::NotFound);
        }
        Ok(Status::Ok)
    }

    fn in_bounds(&self) -> Result<bool> {
        if self.from.cond == Condition::Eq && self.compare(&self.from)? != Ordering::Equal {
            return Ok(false);
        }
        let ord = match self.to.cond {
            Condition::NotSet | Condition::First | Condition::Last => return Ok(true),
            _ if self.to.values.is_empty() => return Ok(true),
            _ => self.compare(&self.to)?,
        };
        Ok(match self.to.cond {
            Condition::Eq => ord == Ordering::Equal,
            Condition::Gt => ord == Ordering::Greater,
            Condition::Ge => ord != Ordering::Less,
            Condition::Lt => ord == Ordering::Less,
            Condition::Le => ord != Ordering::Greater,
            Condition::NotSet | Condition::First | Condition::Last => true,
        })
    }

    /// Position on the first row satisfying the `from` bound.
    pub fn fetch_first(&mut self) -> Result<Status> {
        self.store_cursor()?;
        self.first_fetched = true;
        self.eof = false;
        let item = self.position_first()?;
        self.accept(item)
    }

    /// Advance one row. `NotFound` means no more rows inside the bounds.
    pub fn fetch(&mut self, direction: FetchDirection) -> Result<Status> {
        self.store_cursor()?;
        if !self.first_fetched {
            return self.fetch_first();
        }
        if self.eof {
            return Ok(Status::NotFound);
        }
        let direction = match direction {
            FetchDirection::Default => self.direction(),
            explicit => explicit,
        };
        let op = match direction {
            FetchDirection::Backward => CursorOp::Prev,
            _ => CursorOp::Next,
        };
        let item = self.seek(op, None)?;
        self.accept(item)
    }

    /// Write the record's data fields to the row under the cursor.
    pub fn update(&mut self, after: AfterWrite) -> Result<()> {
        let data = self.file.record().pack_data();
        self.store_cursor()?.put_current(&data)?;
        if after == AfterWrite::DiscardData {
            self.file.record_mut().clear_data();
        }
        Ok(())
    }

    /// Write `data` as the blob of the row under the cursor.
    pub fn update_blob(&mut self, data: &[u8], after: AfterWrite) -> Result<()> {
        if !self.file.record().is_blob() {
            return Err(Error::invalid("update_blob on a record with typed data fields"));
        }
        self.file.record_mut().set_blob_data(data)?;
        self.update(after)
    }

    /// Delete the row under the cursor.
    pub fn delete(&mut self, if_not_found: IfNotFound) -> Result<Status> {
        match self.store_cursor()?.del_current()? {
            Status::NotFound if if_not_found == IfNotFound::Fail => Err(Error::NotFound),
            status => Ok(status),
        }
    }

    /// Number of rows sharing the current key
    pub fn key_dup_count(&mut self) -> Result<usize> {
        self.store_cursor()?.count()
    }

    /// Release the store cursor, keeping bounds and direction.
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.txn = None;
    }

    /// Reacquire a store cursor in `txn`. Bounds and direction are kept;
    /// the next fetch starts again from the `from` bound.
    pub fn reopen(&mut self, txn: Option<&Transaction>) -> Result<()> {
        self.close();
        self.cursor = Some(self.file.database().cursor(txn)?);
        self.txn = txn.cloned();
        self.first_fetched = false;
        self.eof = false;
        debug!("reopened cursor on {}", self.file.database().name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DbFlags;
    use crate::env::Environment;
    use crate::types::EnvConfig;
    use crate::value::FieldType;
    use tempfile::TempDir;

    fn odd_keys(env: &Environment) -> RecordFile {
        let mut rec = Record::new();
        rec.bind_key("id", FieldType::Int32).bind_data("label", FieldType::Str);
        let mut file = RecordFile::open(env, "odd", rec, DbFlags::CREATE).unwrap();
        for id in [1, 3, 5, 7, 9] {
            file.record_mut().set("id", id).unwrap();
            file.record_mut().set("label", format!("n{}", id)).unwrap();
            assert_eq!(file.insert(None).unwrap(), Status::Ok);
        }
        file
    }

    fn collect(cursor: &mut RecordCursor<'_>) -> Vec<i32> {
        let mut ids = Vec::new();
        let mut status = cursor.fetch_first().unwrap();
        while status == Status::Ok {
            match cursor.record().get("id") {
                Some(FieldValue::Int32(id)) => ids.push(*id),
                other => panic!("unexpected id {:?}", other),
            }
            status = cursor.fetch(FetchDirection::Default).unwrap();
        }
        ids
    }

    #[test]
    fn test_exclusive_bounds() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut file = odd_keys(&env);
        let mut cursor = RecordCursor::new(&mut file, None).unwrap();

        cursor.set_condition(Condition::Gt, Condition::Lt);
        cursor.from().push(3);
        cursor.to().push(9);
        assert_eq!(collect(&mut cursor), vec![5, 7]);

        cursor.set_condition(Condition::Gt, Condition::NotSet);
        cursor.from().push(4);
        assert_eq!(collect(&mut cursor), vec![5, 7, 9]);
    }

    #[test]
    fn test_backward_bounds() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut file = odd_keys(&env);
        let mut cursor = RecordCursor::new(&mut file, None).unwrap();

        cursor.set_condition(Condition::Le, Condition::Ge);
        cursor.from().push(7);
        cursor.to().push(3);
        assert_eq!(cursor.direction(), FetchDirection::Backward);
        assert_eq!(collect(&mut cursor), vec![7, 5, 3]);

        cursor.set_condition(Condition::Lt, Condition::NotSet);
        cursor.from().push(100);
        assert_eq!(collect(&mut cursor), vec![9, 7, 5, 3, 1]);

        cursor.set_condition(Condition::Last, Condition::Gt);
        cursor.to().push(5);
        assert_eq!(collect(&mut cursor), vec![9, 7]);
    }

    #[test]
    fn test_eq_matches_composite_prefix() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut rec = Record::new();
        rec.bind_key("group", FieldType::Uint32).bind_key("seq", FieldType::Uint32);
        let mut file = RecordFile::open(&env, "pairs", rec, DbFlags::CREATE).unwrap();
        for (group, seq) in [(1u32, 1u32), (2, 1), (2, 2), (2, 3), (3, 1)] {
            file.record_mut().set("group", group).unwrap();
            file.record_mut().set("seq", seq).unwrap();
            file.insert(None).unwrap();
        }

        let mut cursor = RecordCursor::new(&mut file, None).unwrap();
        cursor.set_condition(Condition::Eq, Condition::NotSet);
        cursor.from().push(2u32);
        let mut seqs = Vec::new();
        let mut status = cursor.fetch_first().unwrap();
        while status.is_ok() {
            seqs.push(cursor.record().get("seq").cloned());
            status = cursor.fetch(FetchDirection::Default).unwrap();
        }
        assert_eq!(
            seqs,
            vec![
                Some(FieldValue::Uint32(1)),
                Some(FieldValue::Uint32(2)),
                Some(FieldValue::Uint32(3))
            ]
        );
    }

    #[test]
    fn test_update_and_delete_under_cursor() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut file = odd_keys(&env);
        {
            let mut cursor = RecordCursor::new(&mut file, None).unwrap();
            cursor.set_condition(Condition::Eq, Condition::NotSet);
            cursor.from().push(5);
            assert_eq!(cursor.fetch_first().unwrap(), Status::Ok);
            cursor.record_mut().set("label", "five").unwrap();
            cursor.update(AfterWrite::DiscardData).unwrap();
            assert_eq!(cursor.record().get("label"), Some(&FieldValue::Str(String::new())));

            cursor.set_condition(Condition::Eq, Condition::NotSet);
            cursor.from().push(7);
            assert_eq!(cursor.fetch_first().unwrap(), Status::Ok);
            assert_eq!(cursor.delete(IfNotFound::Fail).unwrap(), Status::Ok);
            assert_eq!(cursor.delete(IfNotFound::Ignore).unwrap(), Status::NotFound);
            assert!(matches!(cursor.delete(IfNotFound::Fail), Err(Error::NotFound)));
        }

        file.record_mut().set("id", 5).unwrap();
        assert_eq!(file.fetch(None).unwrap(), Status::Ok);
        assert_eq!(file.record().get("label"), Some(&FieldValue::Str("five".into())));
        assert_eq!(file.len(None).unwrap(), 4);
    }

    #[test]
    fn test_close_and_reopen_keeps_conditions() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut file = odd_keys(&env);
        let mut cursor = RecordCursor::new(&mut file, None).unwrap();
        cursor.set_condition(Condition::Ge, Condition::Le);
        cursor.from().push(3);
        cursor.to().push(5);
        assert_eq!(cursor.fetch_first().unwrap(), Status::Ok);

        cursor.close();
        assert!(!cursor.is_open());
        assert!(matches!(cursor.fetch(FetchDirection::Default), Err(Error::CursorClosed)));

        cursor.reopen(None).unwrap();
        assert_eq!(collect(&mut cursor), vec![3, 5]);
    }

    #[test]
    fn test_key_dup_count() {
        let dir = TempDir::new().unwrap();
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let mut rec = Record::new();
        rec.bind_key("tag", FieldType::Str).bind_data("n", FieldType::Uint32);
        let mut file = RecordFile::open(&env, "tags", rec, DbFlags::CREATE | DbFlags::DUPSORT).unwrap();
        for n in 0..3u32 {
            file.record_mut().set("tag", "a").unwrap();
            file.record_mut().set("n", n).unwrap();
            assert_eq!(file.insert(None).unwrap(), Status::Ok);
        }
        assert_eq!(file.insert(None).unwrap(), Status::KeyDup);

        let mut cursor = RecordCursor::new(&mut file, None).unwrap();
        assert_eq!(cursor.fetch_first().unwrap(), Status::Ok);
        assert_eq!(cursor.key_dup_count().unwrap(), 3);
    }
}
