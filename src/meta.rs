use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use tempfile::NamedTempFile;

use crate::constants::{BDB_MAGIC, FILE_VERSION};
use crate::error::{Error, Result};

/// Sorted rows of one database: key to its data items.
/// Without DUPSORT every key holds exactly one item.
pub(crate) type Tree = BTreeMap<Vec<u8>, Vec<Vec<u8>>>;

/// Size of the fixed file header in bytes
pub(crate) const HEADER_SIZE: usize = 24;

/// Header at the start of every database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeader {
    /// Magic number identifying a bdbkit file
    pub(crate) magic: u32,
    /// Format version
    pub(crate) version: u32,
    /// Database flags the file was created with
    pub(crate) flags: u32,
    /// Number of distinct keys that follow
    pub(crate) keys: u64,
    /// Reserved, always zero
    pub(crate) reserved: u32,
}

impl FileHeader {
    pub(crate) fn new(flags: u32, keys: u64) -> Self {
        FileHeader {
            magic: BDB_MAGIC,
            version: FILE_VERSION,
            flags,
            keys,
            reserved: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&self.keys.to_le_bytes());
        buf[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Corrupted("file shorter than header".into()));
        }
        let header = FileHeader {
            magic: read_u32(buf, 0)?,
            version: read_u32(buf, 4)?,
            flags: read_u32(buf, 8)?,
            keys: read_u64(buf, 12)?,
            reserved: read_u32(buf, 20)?,
        };

        // Validate magic number
        if header.magic != BDB_MAGIC {
            return Err(Error::Corrupted(format!("bad magic {:#x}", header.magic)));
        }

        // Validate version
        if header.version != FILE_VERSION {
            return Err(Error::VersionMismatch {
                found: header.version,
                expected: FILE_VERSION,
            });
        }
        Ok(header)
    }
}

fn read_u32(buf: &[u8], off: usize) -> Result<u32> {
    buf.get(off..off + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::Corrupted(format!("truncated u32 at offset {}", off)))
}

fn read_u64(buf: &[u8], off: usize) -> Result<u64> {
    buf.get(off..off + 8)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::Corrupted(format!("truncated u64 at offset {}", off)))
}

fn read_bytes(buf: &[u8], off: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(buf, *off)? as usize;
    *off += 4;
    let bytes = buf
        .get(*off..*off + len)
        .ok_or_else(|| Error::Corrupted(format!("truncated item at offset {}", *off)))?;
    *off += len;
    Ok(bytes.to_vec())
}

/// Load a database file through a read-only memory map.
pub(crate) fn read_tree(path: &Path) -> Result<(FileHeader, Tree)> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len() as usize;
    if file_size < HEADER_SIZE {
        return Err(Error::Corrupted(format!(
            "{}: {} bytes is too small",
            path.display(),
            file_size
        )));
    }

    // The file is replaced by rename on every flush, so this mapping never
    // observes a partial write.
    let map = unsafe { Mmap::map(&file)? };
    let header = FileHeader::decode(&map[..HEADER_SIZE])?;

    let mut tree = Tree::new();
    let mut off = HEADER_SIZE;
    for _ in 0..header.keys {
        let key = read_bytes(&map, &mut off)?;
        let dups = read_u32(&map, off)? as usize;
        off += 4;
        let mut items = Vec::with_capacity(dups);
        for _ in 0..dups {
            items.push(read_bytes(&map, &mut off)?);
        }
        tree.insert(key, items);
    }
    if off != map.len() {
        return Err(Error::Corrupted(format!(
            "{}: {} trailing bytes",
            path.display(),
            map.len() - off
        )));
    }
    Ok((header, tree))
}

/// Persist a database atomically: write a uniquely named sibling temp
/// file, then rename it over `path`.
pub(crate) fn write_tree(path: &Path, flags: u32, tree: &Tree) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        out.write_all(&FileHeader::new(flags, tree.len() as u64).encode())?;
        for (key, items) in tree {
            out.write_all(&(key.len() as u32).to_le_bytes())?;
            out.write_all(key)?;
            out.write_all(&(items.len() as u32).to_le_bytes())?;
            for item in items {
                out.write_all(&(item.len() as u32).to_le_bytes())?;
                out.write_all(item)?;
            }
        }
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
