use bdbkit::{
    parse_query, Condition, DbFlags, EnvConfig, Environment, FetchDirection, FieldType, FieldValue,
    FileScanner, OnRecordFound, Record, RecordCursor, RecordFile, ScanAction, Status,
};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), EnvConfig::default()).unwrap();
    (temp_dir, env)
}

/// Rows keyed by `id` with a `kind` string and a `score`
fn open_items(env: &Environment, ids: impl IntoIterator<Item = u32>) -> RecordFile {
    let mut rec = Record::new();
    rec.bind_key("id", FieldType::Uint32)
        .bind_data("kind", FieldType::Str)
        .bind_data("score", FieldType::Float64);
    let mut file = RecordFile::open(env, "items", rec, DbFlags::CREATE).unwrap();
    for id in ids {
        let rec = file.record_mut();
        rec.set("id", id).unwrap();
        rec.set("kind", if id % 2 == 0 { "even" } else { "odd" }).unwrap();
        rec.set("score", id as f64 / 2.0).unwrap();
        assert_eq!(file.insert(None).unwrap(), Status::Ok);
    }
    file
}

fn current_id(cursor: &RecordCursor<'_>) -> u32 {
    match cursor.record().get("id") {
        Some(FieldValue::Uint32(id)) => *id,
        other => panic!("unexpected id {:?}", other),
    }
}

#[test]
fn test_ge_le_bounds() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, [1, 3, 5, 7, 9]);
    let mut cursor = RecordCursor::new(&mut file, None).unwrap();

    cursor.set_condition(Condition::Ge, Condition::Le);
    cursor.from().push(3u32);
    cursor.to().push(7u32);

    let mut ids = Vec::new();
    assert_eq!(cursor.fetch(FetchDirection::Forward).unwrap(), Status::Ok);
    ids.push(current_id(&cursor));
    while cursor.fetch(FetchDirection::Forward).unwrap() == Status::Ok {
        ids.push(current_id(&cursor));
    }
    assert_eq!(ids, vec![3, 5, 7]);
    // Stays at end of data
    assert_eq!(cursor.fetch(FetchDirection::Forward).unwrap(), Status::NotFound);
}

#[test]
fn test_set_condition_clears_bound_values() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, [1, 3, 5, 7, 9]);
    let mut cursor = RecordCursor::new(&mut file, None).unwrap();

    for (from, to) in [(3u32, 7u32), (5, 5), (1, 9)] {
        cursor.set_condition(Condition::Ge, Condition::Le);
        assert!(cursor.from().values().is_empty());
        assert!(cursor.to().values().is_empty());
        cursor.from().push(from);
        cursor.to().push(to);
        assert_eq!(cursor.from().values(), &[FieldValue::Uint32(from)]);

        let mut count = 0;
        let mut status = cursor.fetch_first().unwrap();
        while status.is_ok() {
            let id = current_id(&cursor);
            assert!(from <= id && id <= to);
            count += 1;
            status = cursor.fetch(FetchDirection::Default).unwrap();
        }
        assert!(count > 0);
    }

    // A bound value of the wrong type is rejected
    cursor.set_condition(Condition::Ge, Condition::NotSet);
    cursor.from().push(-1);
    assert!(cursor.fetch_first().is_err());
}

#[test]
fn test_explicit_direction_overrides_default() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, 1..=6);
    let mut cursor = RecordCursor::new(&mut file, None).unwrap();

    cursor.set_condition(Condition::Eq, Condition::NotSet);
    cursor.from().push(4u32);
    assert_eq!(cursor.fetch_first().unwrap(), Status::Ok);
    assert_eq!(current_id(&cursor), 4);
    // Eq bound: the neighbours are outside it
    assert_eq!(cursor.fetch(FetchDirection::Backward).unwrap(), Status::NotFound);

    cursor.set_condition(Condition::Ge, Condition::NotSet);
    cursor.from().push(4u32);
    cursor.fetch_first().unwrap();
    assert_eq!(cursor.fetch(FetchDirection::Backward).unwrap(), Status::Ok);
    assert_eq!(current_id(&cursor), 3);
}

struct StopAfter {
    limit: usize,
    seen: Vec<u32>,
}

impl OnRecordFound for StopAfter {
    fn on_record_found(&mut self, record: &Record) -> ScanAction {
        if let Some(FieldValue::Uint32(id)) = record.get("id") {
            self.seen.push(*id);
        }
        if self.seen.len() >= self.limit {
            ScanAction::Stop
        } else {
            ScanAction::Continue
        }
    }
}

#[test]
fn test_scan_stops_on_handler_request() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, 0..10);
    let mut query = parse_query("kind = 'even'").unwrap();

    let mut scanner = FileScanner::with_handler(StopAfter {
        limit: 2,
        seen: Vec::new(),
    });
    let mut cursor = RecordCursor::new(&mut file, None).unwrap();
    let found = scanner.scan_cursor(&mut cursor, &mut query).unwrap();

    assert_eq!(found, 2);
    assert_eq!(scanner.handler().seen, vec![0, 2]);
    // Left on the second match
    assert_eq!(current_id(&cursor), 2);
    assert_eq!(cursor.fetch(FetchDirection::Default).unwrap(), Status::Ok);
    assert_eq!(current_id(&cursor), 3);
}

#[test]
fn test_full_scan_counts_matches() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, 0..10);
    let mut query = parse_query("kind = even AND score >= 1.5").unwrap();

    let mut matched = Vec::new();
    let mut scanner = FileScanner::with_handler(|rec: &Record| {
        matched.push(rec.get("id").cloned());
        ScanAction::Continue
    });
    let found = scanner.scan(&mut file, None, &mut query).unwrap();
    drop(scanner);

    // "even" is a bare word but no field has that name, so it is a literal
    assert_eq!(found, 3);
    let expected: Vec<_> = [4u32, 6, 8]
        .iter()
        .map(|id| Some(FieldValue::Uint32(*id)))
        .collect();
    assert_eq!(matched, expected);
}

#[test]
fn test_scan_cursor_combines_range_and_filter() {
    let (_dir, env) = setup_test_env();
    let mut file = open_items(&env, 0..20);
    let mut query = parse_query("kind <> odd").unwrap();

    let mut scanner = FileScanner::new();
    let mut cursor = RecordCursor::new(&mut file, None).unwrap();
    cursor.set_condition(Condition::Gt, Condition::Lt);
    cursor.from().push(5u32);
    cursor.to().push(15u32);
    // 6, 8, 10, 12, 14
    assert_eq!(scanner.scan_cursor(&mut cursor, &mut query).unwrap(), 5);
}
