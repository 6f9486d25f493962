use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EnvFlags: u32 {
        /// Create the environment directory if missing
        const CREATE = 0x01;
        /// Skip persisting databases on commit; `sync` still writes them
        const NOSYNC = 0x10000;
        /// Open read-only
        const RDONLY = 0x20000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DbFlags: u32 {
        /// Allow several data items per key, kept sorted
        const DUPSORT = 0x04;
        /// Reject writes through this handle
        const RDONLY = 0x20000;
        /// Create the database if it does not exist
        const CREATE = 0x40000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u32 {
        /// Fail with KeyExist if the key is already present
        const NOOVERWRITE = 0x10;
        /// Fail with KeyExist if this exact key/data pair is present
        const NODUPDATA = 0x20;
    }
}

/// Magic number at the head of every database file
pub const BDB_MAGIC: u32 = 0xBEEF_DB01;
/// Version numbers major
pub const VERSION_MAJOR: u32 = 0;
/// Version numbers minor
pub const VERSION_MINOR: u32 = 1;
/// On-disk format version
pub const FILE_VERSION: u32 = VERSION_MAJOR << 16 | VERSION_MINOR;
/// Database file suffix inside the environment directory
pub const DB_FILE_EXT: &str = "bdb";

/// Default lock wait before giving up, in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
/// Default maximum number of databases per environment
pub const DEFAULT_MAX_DBS: u32 = 128;
