// src/lib.rs
mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod file;
mod lock;
mod meta;
mod parser;
mod query;
mod range_map;
mod record;
mod record_cursor;
mod scanner;
mod transaction;
mod types;
mod value;

pub use constants::{DbFlags, EnvFlags, WriteFlags};
pub use cursor::{Cursor, Item};
pub use database::Database;
pub use env::Environment;
pub use error::{Error, Result, Status};
pub use file::RecordFile;
pub use parser::parse_query;
pub use query::{CompareOp, LogicalOp, NodeBuildError, NodeKind, Query, QueryNode, QueryTree};
pub use range_map::{IdRange, RangeMap};
pub use record::{FieldDef, Record};
pub use record_cursor::{
    AfterWrite, CondKey, Condition, FetchDirection, IfNotFound, LockMode, RecordCursor,
};
pub use scanner::{FileScanner, KeepScanning, OnRecordFound, ScanAction};
pub use transaction::{with_txn_retry, Transaction};
pub use types::{CursorOp, EnvConfig, Stat};
pub use value::{FieldType, FieldValue};

/// Re-exported so callers can build and inspect free lists and id sets
pub use croaring::Bitmap;
