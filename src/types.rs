use std::time::Duration;

use crate::constants::{EnvFlags, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_DBS};

/// Store-level cursor positioning operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    First,
    Last,
    Next,
    Prev,
    NextDup,
    PrevDup,
    NextNoDup,
    PrevNoDup,
    /// Exact key match
    Set,
    /// First key greater than or equal to the given key
    SetRange,
    GetCurrent,
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Number of distinct keys
    pub keys: usize,
    /// Number of key/data items, duplicates included
    pub entries: usize,
    /// Database flags as stored in the file header
    pub flags: u32,
}

/// Environment configuration, passed explicitly at open time
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Environment flags
    pub flags: EnvFlags,
    /// How long a transaction waits for a record lock
    pub lock_timeout: Duration,
    /// Maximum number of named databases
    pub max_dbs: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            flags: EnvFlags::CREATE,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            max_dbs: DEFAULT_MAX_DBS,
        }
    }
}
