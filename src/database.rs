use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::constants::{DbFlags, WriteFlags};
use crate::cursor::Cursor;
use crate::env::{EnvShared, Environment};
use crate::error::{Error, Result};
use crate::lock::{lock, read};
use crate::meta::{self, Tree};
use crate::transaction::Transaction;
use crate::types::Stat;

/// State shared by every handle on one named database
#[derive(Debug)]
pub(crate) struct DbShared {
    /// Database name inside the environment
    pub(crate) name: String,
    /// Backing file
    pub(crate) path: PathBuf,
    /// Flags the database was created with
    pub(crate) flags: DbFlags,
    /// Last committed rows
    pub(crate) tree: RwLock<Arc<Tree>>,
    /// Committed rows not yet written to `path`
    pub(crate) dirty: AtomicBool,
    /// Serializes writers of `path`
    pub(crate) flush_lock: Mutex<()>,
}

impl DbShared {
    pub(crate) fn is_dupsort(&self) -> bool {
        self.flags.contains(DbFlags::DUPSORT)
    }

    /// Snapshot of the committed rows.
    pub(crate) fn committed(&self) -> Arc<Tree> {
        Arc::clone(&read(&self.tree))
    }

    /// Write committed rows to disk if anything changed since the last flush.
    /// The snapshot is taken under `flush_lock`, so a later flush always
    /// writes a tree at least as new as an earlier one.
    pub(crate) fn flush(&self) -> Result<()> {
        let _guard = lock(&self.flush_lock);
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let tree = self.committed();
        if let Err(e) = meta::write_tree(&self.path, self.flags.bits(), &tree) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        debug!("flushed database {} ({} keys)", self.name, tree.len());
        Ok(())
    }
}

/// One logged mutation, replayed onto the committed rows at commit time
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Put {
        key: Vec<u8>,
        data: Vec<u8>,
        flags: WriteFlags,
    },
    Del {
        key: Vec<u8>,
        data: Option<Vec<u8>>,
    },
    /// Replace one data item of `key` in place
    Replace {
        key: Vec<u8>,
        old: Vec<u8>,
        new: Vec<u8>,
    },
}

/// Outcome of applying a `WriteOp` to a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// Rows changed; carries the duplicate index of the written item
    Written(usize),
    /// Nothing matched, rows unchanged
    Missing,
}

impl WriteOp {
    pub(crate) fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Del { key, .. } | WriteOp::Replace { key, .. } => key,
        }
    }

    /// Apply to `tree`. `checked` enforces NOOVERWRITE/NODUPDATA; replays
    /// at commit time skip the checks because they already passed.
    pub(crate) fn apply(&self, tree: &mut Tree, dupsort: bool, checked: bool) -> Result<Applied> {
        match self {
            WriteOp::Put { key, data, flags } => {
                let items = tree.entry(key.clone()).or_default();
                if !dupsort {
                    if checked && flags.contains(WriteFlags::NOOVERWRITE) && !items.is_empty() {
                        return Err(Error::KeyExist);
                    }
                    items.clear();
                    items.push(data.clone());
                    return Ok(Applied::Written(0));
                }
                match items.binary_search(data) {
                    Ok(pos) => {
                        if checked
                            && (flags.contains(WriteFlags::NODUPDATA)
                                || flags.contains(WriteFlags::NOOVERWRITE))
                        {
                            return Err(Error::KeyExist);
                        }
                        Ok(Applied::Written(pos))
                    }
                    Err(pos) => {
                        if checked && flags.contains(WriteFlags::NOOVERWRITE) && !items.is_empty() {
                            return Err(Error::KeyExist);
                        }
                        items.insert(pos, data.clone());
                        Ok(Applied::Written(pos))
                    }
                }
            }
            WriteOp::Del { key, data } => {
                let Some(items) = tree.get_mut(key) else {
                    return Ok(Applied::Missing);
                };
                match data {
                    None => {
                        tree.remove(key);
                        Ok(Applied::Written(0))
                    }
                    Some(data) => match items.iter().position(|d| d == data) {
                        Some(pos) => {
                            items.remove(pos);
                            if items.is_empty() {
                                tree.remove(key);
                            }
                            Ok(Applied::Written(pos))
                        }
                        None => Ok(Applied::Missing),
                    },
                }
            }
            WriteOp::Replace { key, old, new } => {
                let Some(items) = tree.get_mut(key) else {
                    return Ok(Applied::Missing);
                };
                let Some(pos) = items.iter().position(|d| d == old) else {
                    return Ok(Applied::Missing);
                };
                if !dupsort {
                    items[pos] = new.clone();
                    return Ok(Applied::Written(pos));
                }
                items.remove(pos);
                let pos = match items.binary_search(new) {
                    Ok(pos) => pos,
                    Err(pos) => {
                        items.insert(pos, new.clone());
                        pos
                    }
                };
                Ok(Applied::Written(pos))
            }
        }
    }
}

/// Handle on one named database of an environment
#[derive(Debug, Clone)]
pub struct Database {
    /// Owning environment
    pub(crate) env: Arc<EnvShared>,
    /// Shared rows and file state
    pub(crate) shared: Arc<DbShared>,
    /// Flags given when this handle was opened
    pub(crate) handle_flags: DbFlags,
}

impl Database {
    /// Open a named database; shorthand for `Environment::open_db`.
    pub fn open(env: &Environment, name: &str, flags: DbFlags) -> Result<Self> {
        env.open_db(name, flags)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get database flags
    pub fn flags(&self) -> DbFlags {
        self.shared.flags
    }

    pub fn is_dupsort(&self) -> bool {
        self.shared.is_dupsort()
    }

    pub fn is_readonly(&self) -> bool {
        self.handle_flags.contains(DbFlags::RDONLY) || self.env.is_readonly()
    }

    /// Rows visible to `txn`, or the committed rows without one.
    pub(crate) fn view(&self, txn: Option<&Transaction>) -> Result<Arc<Tree>> {
        match txn {
            Some(txn) => txn.tree(self),
            None => {
                self.env.check_open()?;
                Ok(self.shared.committed())
            }
        }
    }

    /// Get the first data item stored under `key`
    pub fn get(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.view(txn)?;
        Ok(tree.get(key).and_then(|items| items.first().cloned()))
    }

    /// Put a key/data pair
    pub fn put(&self, txn: Option<&Transaction>, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let op = WriteOp::Put {
            key: key.to_vec(),
            data: data.to_vec(),
            flags,
        };
        self.apply(txn, op).map(|_| ())
    }

    /// Delete `key`, or only the given data item of a duplicate key.
    /// Returns false when nothing matched.
    pub fn del(&self, txn: Option<&Transaction>, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        let op = WriteOp::Del {
            key: key.to_vec(),
            data: data.map(<[u8]>::to_vec),
        };
        Ok(self.apply(txn, op)? != Applied::Missing)
    }

    /// Run one write, inside `txn` or in an implicit transaction of its own.
    pub(crate) fn apply(&self, txn: Option<&Transaction>, op: WriteOp) -> Result<Applied> {
        if self.is_readonly() {
            return Err(Error::ReadOnly);
        }
        match txn {
            Some(txn) => txn.apply(self, op),
            None => {
                let txn = Environment::from_shared(Arc::clone(&self.env)).begin_txn()?;
                match txn.apply(self, op) {
                    Ok(applied) => {
                        txn.commit()?;
                        Ok(applied)
                    }
                    Err(e) => {
                        txn.abort();
                        Err(e)
                    }
                }
            }
        }
    }

    /// Number of key/data items, duplicates included
    pub fn len(&self, txn: Option<&Transaction>) -> Result<usize> {
        Ok(self.view(txn)?.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self, txn: Option<&Transaction>) -> Result<bool> {
        Ok(self.view(txn)?.is_empty())
    }

    /// Get database statistics
    pub fn stat(&self, txn: Option<&Transaction>) -> Result<Stat> {
        let tree = self.view(txn)?;
        Ok(Stat {
            keys: tree.len(),
            entries: tree.values().map(Vec::len).sum(),
            flags: self.shared.flags.bits(),
        })
    }

    /// Create a cursor for this database
    pub fn cursor(&self, txn: Option<&Transaction>) -> Result<Cursor> {
        Cursor::new(self, txn)
    }

    /// Write committed rows to the backing file
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }
}
