use std::collections::BTreeMap;

use croaring::{Bitmap, Portable};
use log::{debug, error, warn};

use crate::constants::{DbFlags, WriteFlags};
use crate::cursor::Cursor;
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::types::CursorOp;

/// Key of the row holding the serialized free list
const FREE_LIST_KEY: [u8; 8] = [0; 8];

/// One stored mapping: ids `from..=to` map to `dest..=dest + (to - from)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub from: u32,
    pub to: u32,
    pub dest: u32,
}

impl IdRange {
    pub fn contains(&self, id: u32) -> bool {
        self.from <= id && id <= self.to
    }

    fn remap(&self, id: u32) -> u32 {
        self.dest + (id - self.from)
    }
}

fn range_key(from: u32, to: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&from.to_be_bytes());
    key[4..].copy_from_slice(&to.to_be_bytes());
    key
}

fn decode_row(key: &[u8], data: &[u8]) -> Result<IdRange> {
    let field = |buf: &[u8], at: usize| -> Result<[u8; 4]> {
        buf.get(at..at + 4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .ok_or_else(|| Error::Corrupted(format!("range row of {} bytes", buf.len())))
    };
    if key.len() != 8 || data.len() != 4 {
        return Err(Error::Corrupted(format!(
            "range row with {} byte key and {} byte value",
            key.len(),
            data.len()
        )));
    }
    Ok(IdRange {
        from: u32::from_be_bytes(field(key, 0)?),
        to: u32::from_be_bytes(field(key, 4)?),
        dest: u32::from_le_bytes(field(data, 0)?),
    })
}

/// Persistent set of disjoint id ranges, each remapped linearly onto a
/// destination range, plus a free list of ids considered unallocated.
///
/// The free list lives in memory until `save`. Dropping an open map saves
/// it on a best-effort basis; call `close` to see the error instead.
#[derive(Debug)]
pub struct RangeMap {
    db: Database,
    free_list: Bitmap,
    free_list_loaded: bool,
    contig_gaps: BTreeMap<String, u32>,
    closed: bool,
}

impl RangeMap {
    /// Open (creating if needed) the range map stored in database `name`.
    pub fn open(env: &Environment, name: &str) -> Result<Self> {
        let db = env.open_db(name, DbFlags::CREATE)?;
        if db.is_dupsort() {
            return Err(Error::invalid(format!("{} holds duplicate keys, not a range map", name)));
        }
        Ok(RangeMap {
            db,
            free_list: Bitmap::new(),
            free_list_loaded: false,
            contig_gaps: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Read the stored free list, replacing the in-memory one. An absent
    /// or unreadable blob yields an empty list.
    pub fn load_free_list(&mut self) -> Result<()> {
        self.free_list = match self.db.get(None, &FREE_LIST_KEY)? {
            None => Bitmap::new(),
            Some(blob) => match Bitmap::try_deserialize::<Portable>(&blob) {
                Some(bitmap) => bitmap,
                None => {
                    warn!(
                        "free list of {} is unreadable ({} bytes), starting empty",
                        self.db.name(),
                        blob.len()
                    );
                    Bitmap::new()
                }
            },
        };
        self.free_list_loaded = true;
        Ok(())
    }

    fn ensure_free_list(&mut self) -> Result<()> {
        if !self.free_list_loaded {
            self.load_free_list()?;
        }
        Ok(())
    }

    /// Nearest range whose `from` is not above `id`
    fn probe_le(cursor: &mut Cursor, id: u32) -> Result<Option<IdRange>> {
        let key = range_key(id, u32::MAX);
        let item = match cursor.get(CursorOp::SetRange, Some(&key[..]))? {
            Some(item) if item.0 == key => Some(item),
            Some(_) => cursor.get(CursorOp::Prev, None)?,
            None => cursor.get(CursorOp::Last, None)?,
        };
        match item {
            Some((key, _)) if key == FREE_LIST_KEY => Ok(None),
            Some((key, data)) => decode_row(&key, &data).map(Some),
            None => Ok(None),
        }
    }

    /// Store `from..=to -> dest`. Fails with `InvalidValue`, changing
    /// nothing, for the reserved `[0, 0]` range, an inverted range, a
    /// destination that would overflow, or any overlap with a stored range.
    /// With `add_to_free_list` every id of the range is marked free.
    pub fn add_range(&mut self, from: u32, to: u32, dest: u32, add_to_free_list: bool) -> Result<()> {
        if from == 0 && to == 0 {
            return Err(Error::invalid("range [0, 0] is reserved"));
        }
        if from > to {
            return Err(Error::invalid(format!("range [{}, {}] is inverted", from, to)));
        }
        if dest.checked_add(to - from).is_none() {
            return Err(Error::invalid(format!(
                "range [{}, {}] -> {} overflows the id space",
                from, to, dest
            )));
        }

        let mut cursor = self.db.cursor(None)?;
        if let Some(prev) = Self::probe_le(&mut cursor, from)? {
            if prev.to >= from {
                return Err(Error::invalid(format!(
                    "range [{}, {}] overlaps previous range [{}, {}]",
                    from, to, prev.from, prev.to
                )));
            }
        }
        if let Some(next) = Self::probe_le(&mut cursor, to)? {
            if next.from >= from {
                return Err(Error::invalid(format!(
                    "range [{}, {}] overlaps next range [{}, {}]",
                    from, to, next.from, next.to
                )));
            }
        }
        cursor.close();

        self.db
            .put(None, &range_key(from, to), &dest.to_le_bytes(), WriteFlags::NOOVERWRITE)?;
        debug!("{}: added range [{}, {}] -> {}", self.db.name(), from, to, dest);

        if add_to_free_list {
            self.ensure_free_list()?;
            self.free_list.add_range(from..=to);
        }
        Ok(())
    }

    /// Remap one id, or 0 when it is free (unless `ignore_free_list`) or
    /// outside every range.
    pub fn remap(&mut self, id: u32, ignore_free_list: bool) -> Result<u32> {
        if !ignore_free_list {
            self.ensure_free_list()?;
            if self.free_list.contains(id) {
                return Ok(0);
            }
        }
        let mut cursor = self.db.cursor(None)?;
        Ok(match Self::probe_le(&mut cursor, id)? {
            Some(range) if range.contains(id) => range.remap(id),
            _ => 0,
        })
    }

    /// Remap every id of `src` into `dst`. Ids that were remapped are also
    /// added to `remapped` when given. Consecutive ids inside one range
    /// share a single lookup. Returns the number of ids remapped.
    pub fn remap_bitset(
        &mut self,
        src: &Bitmap,
        dst: &mut Bitmap,
        mut remapped: Option<&mut Bitmap>,
        ignore_free_list: bool,
    ) -> Result<usize> {
        if !ignore_free_list {
            self.ensure_free_list()?;
        }
        let mut cursor = self.db.cursor(None)?;
        let mut window: Option<IdRange> = None;
        let mut count = 0;
        for id in src.iter() {
            if !ignore_free_list && self.free_list.contains(id) {
                continue;
            }
            let range = match window {
                Some(range) if range.contains(id) => range,
                _ => match Self::probe_le(&mut cursor, id)? {
                    Some(range) if range.contains(id) => {
                        window = Some(range);
                        range
                    }
                    _ => continue,
                },
            };
            dst.add(range.remap(id));
            if let Some(remapped) = remapped.as_deref_mut() {
                remapped.add(id);
            }
            count += 1;
        }
        Ok(count)
    }

    /// The in-memory free list (empty until loaded)
    pub fn free_list(&self) -> &Bitmap {
        &self.free_list
    }

    /// Mutable free list, loaded first if needed. Changes persist on `save`.
    pub fn free_list_mut(&mut self) -> Result<&mut Bitmap> {
        self.ensure_free_list()?;
        Ok(&mut self.free_list)
    }

    /// Named gap lengths kept for callers assembling ranges externally.
    /// They are not persisted.
    pub fn contig_gaps(&self) -> &BTreeMap<String, u32> {
        &self.contig_gaps
    }

    pub fn contig_gaps_mut(&mut self) -> &mut BTreeMap<String, u32> {
        &mut self.contig_gaps
    }

    /// Number of stored ranges
    pub fn len(&self) -> Result<usize> {
        let rows = self.db.len(None)?;
        let reserved = self.db.get(None, &FREE_LIST_KEY)?.is_some();
        Ok(rows - usize::from(reserved))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Stored ranges in ascending order
    pub fn ranges(&self) -> Result<Vec<IdRange>> {
        let mut cursor = self.db.cursor(None)?;
        let mut out = Vec::new();
        let mut item = cursor.get(CursorOp::First, None)?;
        while let Some((key, data)) = item {
            if key != FREE_LIST_KEY {
                out.push(decode_row(&key, &data)?);
            }
            item = cursor.get(CursorOp::Next, None)?;
        }
        Ok(out)
    }

    /// Write the free list. Does nothing if it was never loaded.
    pub fn save(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::EnvClosed);
        }
        if !self.free_list_loaded {
            return Ok(());
        }
        let blob = self.free_list.serialize::<Portable>();
        self.db.put(None, &FREE_LIST_KEY, &blob, WriteFlags::empty())?;
        debug!(
            "{}: saved free list ({} ids, {} bytes)",
            self.db.name(),
            self.free_list.cardinality(),
            blob.len()
        );
        Ok(())
    }

    /// Save and release the map, reporting any failure.
    pub fn close(mut self) -> Result<()> {
        let res = self.save();
        self.closed = true;
        res
    }
}

impl Drop for RangeMap {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.save() {
            error!("failed to save range map {} on drop: {}", self.db.name(), e);
        }
    }
}
