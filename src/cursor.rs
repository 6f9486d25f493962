use std::ops::Bound::{Excluded, Unbounded};

use crate::database::{Applied, Database, WriteOp};
use crate::error::{Error, Result, Status};
use crate::meta::Tree;
use crate::transaction::Transaction;
use crate::types::CursorOp;

/// Current cursor position
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    /// Key of the current item
    key: Vec<u8>,
    /// Index among the duplicates of `key`
    dup: usize,
    /// Item was deleted; the next `Next` returns whatever now sits here
    deleted: bool,
}

/// Key/data pair returned by cursor reads
pub type Item = (Vec<u8>, Vec<u8>);

/// Database cursor.
///
/// The position is kept as a key plus duplicate index and re-resolved on
/// every call, so writes through other handles never invalidate it.
#[derive(Debug)]
pub struct Cursor {
    /// The database this cursor operates on
    db: Database,
    /// The transaction this cursor belongs to, if any
    txn: Option<Transaction>,
    pos: Option<Position>,
    closed: bool,
}

fn item_at(tree: &Tree, key: &[u8], dup: usize) -> Option<Item> {
    tree.get(key)
        .and_then(|items| items.get(dup))
        .map(|data| (key.to_vec(), data.clone()))
}

impl Cursor {
    pub(crate) fn new(db: &Database, txn: Option<&Transaction>) -> Result<Self> {
        // Validate the transaction against the database up front
        db.view(txn)?;
        Ok(Cursor {
            db: db.clone(),
            txn: txn.cloned(),
            pos: None,
            closed: false,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.txn.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn validate_cursor(&self) -> Result<()> {
        if self.closed {
            return Err(Error::CursorClosed);
        }
        Ok(())
    }

    fn view(&self) -> Result<std::sync::Arc<Tree>> {
        self.validate_cursor()?;
        self.db.view(self.txn.as_ref())
    }

    /// Position the cursor and return the item there. `key` is required for
    /// `Set` and `SetRange`. Returns `None`, leaving the position unchanged,
    /// when no item qualifies.
    pub fn get(&mut self, op: CursorOp, key: Option<&[u8]>) -> Result<Option<Item>> {
        let tree = self.view()?;
        let found = match op {
            CursorOp::First => tree.iter().next().map(|(k, _)| (k.clone(), 0)),
            CursorOp::Last => tree
                .iter()
                .next_back()
                .map(|(k, items)| (k.clone(), items.len().saturating_sub(1))),
            CursorOp::Next => match &self.pos {
                None => tree.iter().next().map(|(k, _)| (k.clone(), 0)),
                Some(pos) => Self::next_from(&tree, pos, true),
            },
            CursorOp::Prev => match &self.pos {
                None => tree
                    .iter()
                    .next_back()
                    .map(|(k, items)| (k.clone(), items.len().saturating_sub(1))),
                Some(pos) => Self::prev_from(&tree, pos, true),
            },
            CursorOp::NextDup => match &self.pos {
                None => None,
                Some(pos) => {
                    let dup = if pos.deleted { pos.dup } else { pos.dup + 1 };
                    item_at(&tree, &pos.key, dup).map(|_| (pos.key.clone(), dup))
                }
            },
            CursorOp::PrevDup => match &self.pos {
                Some(pos) if pos.dup > 0 => {
                    item_at(&tree, &pos.key, pos.dup - 1).map(|_| (pos.key.clone(), pos.dup - 1))
                }
                _ => None,
            },
            CursorOp::NextNoDup => match &self.pos {
                None => tree.iter().next().map(|(k, _)| (k.clone(), 0)),
                Some(pos) => Self::next_from(&tree, pos, false),
            },
            CursorOp::PrevNoDup => match &self.pos {
                None => tree
                    .iter()
                    .next_back()
                    .map(|(k, items)| (k.clone(), items.len().saturating_sub(1))),
                Some(pos) => Self::prev_from(&tree, pos, false),
            },
            CursorOp::Set => {
                let key = key.ok_or_else(|| Error::invalid("Set requires a key"))?;
                tree.get(key).map(|_| (key.to_vec(), 0))
            }
            CursorOp::SetRange => {
                let key = key.ok_or_else(|| Error::invalid("SetRange requires a key"))?;
                tree.range(key.to_vec()..).next().map(|(k, _)| (k.clone(), 0))
            }
            CursorOp::GetCurrent => match &self.pos {
                Some(pos) if !pos.deleted => item_at(&tree, &pos.key, pos.dup).map(|_| (pos.key.clone(), pos.dup)),
                _ => None,
            },
        };

        Ok(found.and_then(|(key, dup)| {
            let item = item_at(&tree, &key, dup)?;
            self.pos = Some(Position {
                key,
                dup,
                deleted: false,
            });
            Some(item)
        }))
    }

    fn next_from(tree: &Tree, pos: &Position, dups: bool) -> Option<(Vec<u8>, usize)> {
        if dups {
            let dup = if pos.deleted { pos.dup } else { pos.dup + 1 };
            if item_at(tree, &pos.key, dup).is_some() {
                return Some((pos.key.clone(), dup));
            }
        }
        tree.range::<Vec<u8>, _>((Excluded(&pos.key), Unbounded))
            .next()
            .map(|(k, _)| (k.clone(), 0))
    }

    fn prev_from(tree: &Tree, pos: &Position, dups: bool) -> Option<(Vec<u8>, usize)> {
        if dups && pos.dup > 0 {
            if let Some(items) = tree.get(&pos.key) {
                if !items.is_empty() {
                    return Some((pos.key.clone(), (pos.dup - 1).min(items.len() - 1)));
                }
            }
        }
        tree.range::<Vec<u8>, _>((Unbounded, Excluded(&pos.key)))
            .next_back()
            .map(|(k, items)| (k.clone(), items.len().saturating_sub(1)))
    }

    /// Key and data at the current position
    pub fn current(&self) -> Result<Option<Item>> {
        let tree = self.view()?;
        Ok(match &self.pos {
            Some(pos) if !pos.deleted => item_at(&tree, &pos.key, pos.dup),
            _ => None,
        })
    }

    /// Take the transaction's write lock on the current key, then re-read
    /// the item so it reflects the latest committed value.
    pub fn lock_current(&mut self) -> Result<Option<Item>> {
        let Some(pos) = self.pos.clone() else {
            return Ok(None);
        };
        if let Some(txn) = &self.txn {
            txn.lock_key(&self.db, &pos.key)?;
        }
        self.current()
    }

    /// Replace the data item under the cursor
    pub fn put_current(&mut self, data: &[u8]) -> Result<()> {
        let (key, old) = self.current()?.ok_or(Error::NotFound)?;
        let op = WriteOp::Replace {
            key: key.clone(),
            old,
            new: data.to_vec(),
        };
        match self.db.apply(self.txn.as_ref(), op)? {
            Applied::Written(dup) => {
                self.pos = Some(Position {
                    key,
                    dup,
                    deleted: false,
                });
                Ok(())
            }
            Applied::Missing => Err(Error::NotFound),
        }
    }

    /// Delete the item under the cursor
    pub fn del_current(&mut self) -> Result<Status> {
        let Some((key, data)) = self.current()? else {
            return Ok(Status::NotFound);
        };
        let op = WriteOp::Del {
            key,
            data: Some(data),
        };
        match self.db.apply(self.txn.as_ref(), op)? {
            Applied::Written(_) => {
                if let Some(pos) = self.pos.as_mut() {
                    pos.deleted = true;
                }
                Ok(Status::Ok)
            }
            Applied::Missing => Ok(Status::NotFound),
        }
    }

    /// Number of data items under the current key
    pub fn count(&self) -> Result<usize> {
        let tree = self.view()?;
        let pos = self.pos.as_ref().ok_or(Error::NotFound)?;
        Ok(tree.get(&pos.key).map_or(0, Vec::len))
    }

    /// Rebind to another transaction (or none); the position is reset.
    pub fn renew(&mut self, txn: Option<&Transaction>) -> Result<()> {
        self.db.view(txn)?;
        self.txn = txn.cloned();
        self.pos = None;
        self.closed = false;
        Ok(())
    }

    /// Release the transaction reference and position
    pub fn close(&mut self) {
        self.txn = None;
        self.pos = None;
        self.closed = true;
    }
}
