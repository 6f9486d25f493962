use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use crate::database::{Applied, Database, DbShared, WriteOp};
use crate::env::{EnvShared, Environment};
use crate::error::{Error, Result};
use crate::lock::{lock, write};
use crate::meta::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

/// Per-database view of a transaction
#[derive(Debug)]
struct TxnDb {
    /// Database the view belongs to
    shared: Arc<DbShared>,
    /// Committed rows at first access, plus this transaction's writes
    tree: Arc<Tree>,
    /// Writes to replay at commit
    log: Vec<WriteOp>,
}

#[derive(Debug)]
struct TxnState {
    status: TxnStatus,
    dbs: HashMap<String, TxnDb>,
}

#[derive(Debug)]
struct TxnInner {
    /// Transaction ID
    id: u64,
    /// Owning environment
    env: Arc<EnvShared>,
    state: Mutex<TxnState>,
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.status == TxnStatus::Active {
            warn!("txn {} dropped while active, aborting", self.id);
            state.status = TxnStatus::Aborted;
            state.dbs.clear();
            self.env.locks.release_all(self.id);
        }
    }
}

/// Database transaction.
///
/// The handle is cheap to clone so cursors can hold it across calls; all
/// clones refer to the same transaction. Writes take exclusive record locks
/// held until `commit` or `abort`. A lock request that would deadlock fails
/// with `Error::Deadlock`; the caller is expected to abort and retry the
/// whole unit of work (see `with_txn_retry`).
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

impl Transaction {
    pub(crate) fn new(env: Arc<EnvShared>, id: u64) -> Self {
        debug!("begin txn {}", id);
        Transaction {
            inner: Arc::new(TxnInner {
                id,
                env,
                state: Mutex::new(TxnState {
                    status: TxnStatus::Active,
                    dbs: HashMap::new(),
                }),
            }),
        }
    }

    /// Get transaction ID
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).status == TxnStatus::Active
    }

    fn check_db(&self, db: &Database) -> Result<()> {
        if !Arc::ptr_eq(&self.inner.env, &db.env) {
            return Err(Error::BadTxn);
        }
        self.inner.env.check_open()
    }

    /// Rows of `db` as this transaction sees them.
    pub(crate) fn tree(&self, db: &Database) -> Result<Arc<Tree>> {
        self.check_db(db)?;
        let mut state = lock(&self.inner.state);
        if state.status != TxnStatus::Active {
            return Err(Error::BadTxn);
        }
        let view = state
            .dbs
            .entry(db.shared.name.clone())
            .or_insert_with(|| TxnDb {
                shared: Arc::clone(&db.shared),
                tree: db.shared.committed(),
                log: Vec::new(),
            });
        Ok(Arc::clone(&view.tree))
    }

    /// Take the write lock on `key`. A newly granted lock refreshes this
    /// transaction's copy of the key from the committed rows, so writes are
    /// computed against the latest committed value.
    pub(crate) fn lock_key(&self, db: &Database, key: &[u8]) -> Result<()> {
        self.check_db(db)?;
        {
            let state = lock(&self.inner.state);
            if state.status != TxnStatus::Active {
                return Err(Error::BadTxn);
            }
        }

        // Block without holding the state mutex
        let fresh = self
            .inner
            .env
            .locks
            .acquire(self.inner.id, (db.shared.name.clone(), key.to_vec()))?;

        let mut state = lock(&self.inner.state);
        let view = state
            .dbs
            .entry(db.shared.name.clone())
            .or_insert_with(|| TxnDb {
                shared: Arc::clone(&db.shared),
                tree: db.shared.committed(),
                log: Vec::new(),
            });
        if fresh {
            let committed = db.shared.committed().get(key).cloned();
            if view.tree.get(key) != committed.as_ref() {
                let tree = Arc::make_mut(&mut view.tree);
                match committed {
                    Some(items) => tree.insert(key.to_vec(), items),
                    None => tree.remove(key),
                };
            }
        }
        Ok(())
    }

    /// Apply one write to this transaction's view and log it for commit.
    pub(crate) fn apply(&self, db: &Database, op: WriteOp) -> Result<Applied> {
        self.lock_key(db, op.key())?;

        let mut state = lock(&self.inner.state);
        if state.status != TxnStatus::Active {
            return Err(Error::BadTxn);
        }
        let view = state
            .dbs
            .get_mut(&db.shared.name)
            .ok_or_else(|| Error::DbNotFound(db.shared.name.clone()))?;
        let dupsort = view.shared.is_dupsort();
        let applied = op.apply(Arc::make_mut(&mut view.tree), dupsort, true)?;
        if applied != Applied::Missing {
            view.log.push(op);
        }
        Ok(applied)
    }

    /// Commit the transaction
    pub fn commit(&self) -> Result<()> {
        let mut state = lock(&self.inner.state);
        if state.status != TxnStatus::Active {
            return Err(Error::BadTxn);
        }
        if let Err(e) = self.inner.env.check_open() {
            state.status = TxnStatus::Aborted;
            state.dbs.clear();
            self.inner.env.locks.release_all(self.inner.id);
            return Err(e);
        }

        let mut touched = Vec::new();
        for view in state.dbs.values() {
            if view.log.is_empty() {
                continue;
            }
            {
                let mut committed = write(&view.shared.tree);
                let tree = Arc::make_mut(&mut committed);
                let dupsort = view.shared.is_dupsort();
                for op in &view.log {
                    // Checks passed when the op was first applied
                    op.apply(tree, dupsort, false)?;
                }
            }
            view.shared.dirty.store(true, std::sync::atomic::Ordering::SeqCst);
            touched.push(Arc::clone(&view.shared));
        }

        // Mark as finished
        state.status = TxnStatus::Committed;
        state.dbs.clear();
        drop(state);
        self.inner.env.locks.release_all(self.inner.id);
        debug!("commit txn {} ({} databases written)", self.inner.id, touched.len());

        // Committed rows are visible from here on; a failed write leaves the
        // database dirty for the next flush or `Environment::sync`.
        if !self.inner.env.is_nosync() {
            for db in touched {
                if let Err(e) = db.flush() {
                    error!("txn {}: flushing database {} failed: {}", self.inner.id, db.name, e);
                }
            }
        }
        Ok(())
    }

    /// Abort the transaction, discarding its writes. No-op once finished.
    pub fn abort(&self) {
        let mut state = lock(&self.inner.state);
        if state.status != TxnStatus::Active {
            return;
        }
        state.status = TxnStatus::Aborted;
        state.dbs.clear();
        drop(state);
        self.inner.env.locks.release_all(self.inner.id);
        debug!("abort txn {}", self.inner.id);
    }
}

/// Run `work` in a fresh transaction and commit it, starting over from
/// scratch whenever the store reports a deadlock. Any other error aborts
/// the transaction and is returned as is. After `max_attempts` deadlocks
/// the last one is returned.
pub fn with_txn_retry<T, F>(env: &Environment, max_attempts: u32, mut work: F) -> Result<T>
where
    F: FnMut(&Transaction) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let txn = env.begin_txn()?;
        let res = work(&txn).and_then(|value| txn.commit().map(|_| value));
        match res {
            Ok(value) => return Ok(value),
            Err(e) => {
                txn.abort();
                if !e.is_deadlock() {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    error!("txn retry gave up after {} deadlocks", attempt);
                    return Err(e);
                }
                debug!("deadlock on attempt {}, retrying txn", attempt);
            }
        }
    }
}
