use bdbkit::{CursorOp, DbFlags, EnvConfig, EnvFlags, Environment, Error, WriteFlags};
use tempfile::TempDir;

// Common test setup
fn setup_test_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), EnvConfig::default()).unwrap();
    (temp_dir, env)
}

#[test]
fn test_database_open_close() {
    let (dir, env) = setup_test_env();

    let db = env.open_db("testdb", DbFlags::CREATE).unwrap();
    assert_eq!(db.name(), "testdb");
    assert!(!db.is_dupsort());
    assert!(dir.path().join("testdb.bdb").exists());

    // Missing database without CREATE
    assert!(matches!(env.open_db("missing", DbFlags::empty()), Err(Error::DbNotFound(_))));

    env.close().unwrap();
    assert!(matches!(db.get(None, b"k"), Err(Error::EnvClosed)));
}

#[test]
fn test_basic_put_get() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db("main", DbFlags::CREATE).unwrap();

    let key = b"test_key";
    let value = b"test_value";

    db.put(None, key, value, WriteFlags::empty()).unwrap();
    assert_eq!(db.get(None, key).unwrap().unwrap(), value);

    assert!(matches!(
        db.put(None, key, b"other", WriteFlags::NOOVERWRITE),
        Err(Error::KeyExist)
    ));
    assert_eq!(db.get(None, key).unwrap().unwrap(), value);
}

#[test]
fn test_delete_operations() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db("main", DbFlags::CREATE).unwrap();

    let key = b"delete_key";
    let value = b"delete_value";

    db.put(None, key, value, WriteFlags::empty()).unwrap();
    assert!(db.get(None, key).unwrap().is_some());

    assert!(db.del(None, key, None).unwrap());
    assert!(db.get(None, key).unwrap().is_none());
    assert!(!db.del(None, key, None).unwrap());
}

#[test]
fn test_database_stats() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db("dups", DbFlags::CREATE | DbFlags::DUPSORT).unwrap();

    let stats = db.stat(None).unwrap();
    assert_eq!(stats.entries, 0);

    for i in 0..5 {
        let key = format!("key_{}", i % 2);
        let value = format!("value_{}", i);
        db.put(None, key.as_bytes(), value.as_bytes(), WriteFlags::empty()).unwrap();
    }

    let stats = db.stat(None).unwrap();
    assert_eq!(stats.keys, 2);
    assert_eq!(stats.entries, 5);
}

#[test]
fn test_transaction_isolation_and_abort() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db("main", DbFlags::CREATE).unwrap();
    db.put(None, b"a", b"1", WriteFlags::empty()).unwrap();

    let txn = env.begin_txn().unwrap();
    db.put(Some(&txn), b"a", b"2", WriteFlags::empty()).unwrap();
    db.put(Some(&txn), b"b", b"3", WriteFlags::empty()).unwrap();
    assert_eq!(db.get(Some(&txn), b"a").unwrap().unwrap(), b"2");
    // Not visible outside until commit
    assert_eq!(db.get(None, b"a").unwrap().unwrap(), b"1");
    txn.abort();
    assert!(!txn.is_active());
    assert!(db.get(None, b"b").unwrap().is_none());
    assert!(matches!(db.get(Some(&txn), b"a"), Err(Error::BadTxn)));

    let txn = env.begin_txn().unwrap();
    db.put(Some(&txn), b"b", b"3", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();
    assert_eq!(db.get(None, b"b").unwrap().unwrap(), b"3");
}

#[test]
fn test_cursor_walk_with_duplicates() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db("dups", DbFlags::CREATE | DbFlags::DUPSORT).unwrap();
    for (k, v) in [("b", "2"), ("a", "9"), ("a", "1"), ("c", "5")] {
        db.put(None, k.as_bytes(), v.as_bytes(), WriteFlags::empty()).unwrap();
    }

    let mut cursor = db.cursor(None).unwrap();
    let mut seen = Vec::new();
    let mut item = cursor.get(CursorOp::First, None).unwrap();
    while let Some((k, v)) = item {
        seen.push((String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap()));
        item = cursor.get(CursorOp::Next, None).unwrap();
    }
    let expected: Vec<(String, String)> = [("a", "1"), ("a", "9"), ("b", "2"), ("c", "5")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(seen, expected);

    let (k, _) = cursor.get(CursorOp::SetRange, Some(&b"a"[..])).unwrap().unwrap();
    assert_eq!(k, b"a");
    assert_eq!(cursor.count().unwrap(), 2);
    let (k, _) = cursor.get(CursorOp::NextNoDup, None).unwrap().unwrap();
    assert_eq!(k, b"b");
}

#[test]
fn test_rows_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let db = env.open_db("persist", DbFlags::CREATE | DbFlags::DUPSORT).unwrap();
        db.put(None, b"k", b"v1", WriteFlags::empty()).unwrap();
        db.put(None, b"k", b"v2", WriteFlags::empty()).unwrap();
        env.close().unwrap();
    }

    let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
    // Flags come from the file
    let db = env.open_db("persist", DbFlags::empty()).unwrap();
    assert!(db.is_dupsort());
    assert_eq!(db.len(None).unwrap(), 2);
}

#[test]
fn test_nosync_defers_to_sync() {
    let dir = TempDir::new().unwrap();
    let config = EnvConfig {
        flags: EnvFlags::CREATE | EnvFlags::NOSYNC,
        ..EnvConfig::default()
    };
    let env = Environment::open(dir.path(), config).unwrap();
    let db = env.open_db("lazy", DbFlags::CREATE).unwrap();
    db.put(None, b"k", b"v", WriteFlags::empty()).unwrap();
    assert!(!dir.path().join("lazy.bdb").exists());
    env.sync().unwrap();
    assert!(dir.path().join("lazy.bdb").exists());
}

#[test]
fn test_readonly_environment() {
    let dir = TempDir::new().unwrap();
    {
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        env.open_db("ro", DbFlags::CREATE).unwrap();
    }
    let config = EnvConfig {
        flags: EnvFlags::RDONLY,
        ..EnvConfig::default()
    };
    let env = Environment::open(dir.path(), config).unwrap();
    let db = env.open_db("ro", DbFlags::empty()).unwrap();
    assert!(matches!(db.put(None, b"k", b"v", WriteFlags::empty()), Err(Error::ReadOnly)));
}
