use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error};

use crate::constants::{DbFlags, EnvFlags, DB_FILE_EXT};
use crate::database::{Database, DbShared};
use crate::error::{Error, Result};
use crate::lock::{lock, LockManager};
use crate::meta::{self, Tree};
use crate::transaction::Transaction;
use crate::types::EnvConfig;

/// State shared by every clone of an `Environment`
#[derive(Debug)]
pub(crate) struct EnvShared {
    /// Path to the environment directory
    pub(crate) path: PathBuf,
    /// Configuration given at open time
    pub(crate) config: EnvConfig,
    /// Databases opened so far, by name
    pub(crate) dbs: Mutex<HashMap<String, Arc<DbShared>>>,
    /// Record locks of write transactions
    pub(crate) locks: LockManager,
    /// Next transaction ID
    pub(crate) next_txn_id: AtomicU64,
    /// Environment is closed
    pub(crate) closed: AtomicBool,
}

impl EnvShared {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::EnvClosed);
        }
        Ok(())
    }

    pub(crate) fn is_readonly(&self) -> bool {
        self.config.flags.contains(EnvFlags::RDONLY)
    }

    pub(crate) fn is_nosync(&self) -> bool {
        self.config.flags.contains(EnvFlags::NOSYNC)
    }

    fn sync_all(&self) -> Result<()> {
        let dbs: Vec<Arc<DbShared>> = lock(&self.dbs).values().cloned().collect();
        for db in dbs {
            db.flush()?;
        }
        Ok(())
    }
}

impl Drop for EnvShared {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) || self.is_readonly() {
            return;
        }
        // Can't return errors from drop
        if let Err(e) = self.sync_all() {
            error!("environment {}: flush on drop failed: {}", self.path.display(), e);
        }
    }
}

/// A directory of named databases sharing one lock manager.
/// Cheap to clone; clones refer to the same environment.
#[derive(Debug, Clone)]
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Open the environment
    pub fn open<P: AsRef<Path>>(path: P, config: EnvConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            if !config.flags.contains(EnvFlags::CREATE) || config.flags.contains(EnvFlags::RDONLY) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("environment directory {} does not exist", path.display()),
                )));
            }
            fs::create_dir_all(&path)?;
        }
        debug!("opened environment {} ({:?})", path.display(), config.flags);

        Ok(Environment {
            shared: Arc::new(EnvShared {
                path,
                locks: LockManager::new(config.lock_timeout),
                config,
                dbs: Mutex::new(HashMap::new()),
                next_txn_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<EnvShared>) -> Self {
        Environment { shared }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &EnvConfig {
        &self.shared.config
    }

    pub fn is_readonly(&self) -> bool {
        self.shared.is_readonly()
    }

    /// Open a named database, loading it from disk on first use.
    pub fn open_db(&self, name: &str, flags: DbFlags) -> Result<Database> {
        self.shared.check_open()?;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::invalid(format!("bad database name {:?}", name)));
        }

        let mut dbs = lock(&self.shared.dbs);
        if let Some(shared) = dbs.get(name) {
            return Ok(Database {
                env: Arc::clone(&self.shared),
                shared: Arc::clone(shared),
                handle_flags: flags,
            });
        }

        if dbs.len() >= self.shared.config.max_dbs as usize {
            return Err(Error::invalid(format!(
                "environment limit of {} databases reached",
                self.shared.config.max_dbs
            )));
        }

        let path = self.shared.path.join(format!("{}.{}", name, DB_FILE_EXT));
        let (db_flags, tree) = if path.exists() {
            let (header, tree) = meta::read_tree(&path)?;
            (DbFlags::from_bits_truncate(header.flags), tree)
        } else if flags.contains(DbFlags::CREATE) {
            if self.is_readonly() {
                return Err(Error::ReadOnly);
            }
            (flags & DbFlags::DUPSORT, Tree::new())
        } else {
            return Err(Error::DbNotFound(name.to_string()));
        };

        let fresh = tree.is_empty() && !path.exists();
        let shared = Arc::new(DbShared {
            name: name.to_string(),
            path,
            flags: db_flags,
            tree: RwLock::new(Arc::new(tree)),
            dirty: AtomicBool::new(fresh),
            flush_lock: Mutex::new(()),
        });
        if fresh && !self.shared.is_nosync() {
            shared.flush()?;
        }
        debug!("opened database {} ({:?})", name, db_flags);
        dbs.insert(name.to_string(), Arc::clone(&shared));

        Ok(Database {
            env: Arc::clone(&self.shared),
            shared,
            handle_flags: flags,
        })
    }

    /// Begin a write-capable transaction
    pub fn begin_txn(&self) -> Result<Transaction> {
        self.shared.check_open()?;
        let id = self.shared.next_txn_id.fetch_add(1, Ordering::SeqCst);
        Ok(Transaction::new(Arc::clone(&self.shared), id))
    }

    /// Flush every database with unsaved committed rows
    pub fn sync(&self) -> Result<()> {
        self.shared.check_open()?;
        self.shared.sync_all()
    }

    /// Flush and close; later operations fail with `EnvClosed`.
    pub fn close(&self) -> Result<()> {
        self.shared.check_open()?;
        let res = if self.is_readonly() { Ok(()) } else { self.shared.sync_all() };
        self.shared.closed.store(true, Ordering::SeqCst);
        debug!("closed environment {}", self.shared.path.display());
        res
    }
}
