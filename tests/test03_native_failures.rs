mod common;

use std::rc::Rc;

use embed_sqlite::prelude::*;
use embed_sqlite::{RusqliteEngine, Status};

use common::open_counting;

#[test]
fn syntax_error_fails_prepare() -> Result<(), Box<dyn std::error::Error>> {
    let (db, exports) = open_counting()?;
    let err = db.query("SELEC 1", ()).unwrap_err();
    assert!(matches!(err, EmbedSqliteError::Prepare(_)));
    assert_eq!(err.code(), Some(1));
    assert!(err.to_string().contains("syntax error"), "{err}");
    assert!(exports.prepared.borrow().is_empty());
    assert_eq!(exports.finalize_calls(), 0);
    Ok(())
}

#[test]
fn sql_without_a_statement_fails_prepare() -> Result<(), Box<dyn std::error::Error>> {
    let (db, exports) = open_counting()?;
    for sql in ["", "   ", "-- hi", "/* nothing */ ;"] {
        let err = db.query(sql, ()).unwrap_err();
        assert!(matches!(err, EmbedSqliteError::Prepare(_)), "{sql:?}: {err:?}");
        assert_eq!(err.status(), Some(Status::Error), "{sql:?}");
        assert!(err.to_string().contains("not an SQL statement"), "{err}");
    }
    assert!(exports.prepared.borrow().is_empty());
    Ok(())
}

#[test]
fn exhausted_native_memory_reports_nomem() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Rc::new(RusqliteEngine::with_memory_limit(128));
    let db = Connection::open_with_exports(engine.clone(), &OpenOptions::default())?;

    let sql = format!("SELECT '{}'", "x".repeat(256));
    let err = db.query(&sql, ()).unwrap_err();
    assert!(matches!(err, EmbedSqliteError::Prepare(_)));
    assert_eq!(err.status(), Some(Status::NoMem));
    assert_eq!(engine.live_statements(), 0);

    let err = db.query("SELECT ?", params!["y".repeat(256)]).unwrap_err();
    assert!(matches!(err, EmbedSqliteError::Bind(_)));
    assert_eq!(err.code(), Some(7));
    assert_eq!(engine.live_statements(), 0);
    Ok(())
}

#[test]
fn oversized_column_reports_nomem() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Rc::new(RusqliteEngine::with_memory_limit(256));
    let db = Connection::open_with_exports(engine.clone(), &OpenOptions::default())?;

    let mut rows = db.query("SELECT 1 AS n, hex(zeroblob(300)) AS h", ())?;
    match rows.next() {
        Some(Err(err @ EmbedSqliteError::Step(_))) => {
            assert_eq!(err.status(), Some(Status::NoMem));
        }
        other => panic!("expected an out-of-memory step error, got {other:?}"),
    }
    assert!(rows.next().is_none());
    assert_eq!(db.open_cursors(), 0);
    assert_eq!(engine.live_statements(), 0);

    let mut rows = db.query("SELECT zeroblob(300) AS b", ())?;
    let err = rows.next().ok_or("expected an item")?.unwrap_err();
    assert_eq!(err.code(), Some(7));
    assert_eq!(engine.live_statements(), 0);
    Ok(())
}

#[test]
fn step_failure_after_a_row_is_deferred() -> Result<(), Box<dyn std::error::Error>> {
    let (db, exports) = open_counting()?;
    db.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2), (3);")?;

    let mut rows = db.query("SELECT v FROM t ORDER BY v", ())?;
    exports.fail_step_after.set(Some(0));

    let first = rows.next().ok_or("expected a row")??;
    assert_eq!(first.get("v"), Some(&Value::Int(1)));
    assert_eq!(db.open_cursors(), 0);

    match rows.next() {
        Some(Err(err @ EmbedSqliteError::Step(_))) => assert_eq!(err.status(), Some(Status::Error)),
        other => panic!("expected a deferred step error, got {other:?}"),
    }
    assert!(rows.next().is_none());
    drop(rows);
    exports.assert_each_finalized_once();
    Ok(())
}

#[test]
fn failed_batch_reports_step_error() -> Result<(), Box<dyn std::error::Error>> {
    let db = Connection::open_in_memory()?;
    let err = db.execute_batch("CREATE TABLE t (v); CREATE TABLE t (v);").unwrap_err();
    assert!(matches!(err, EmbedSqliteError::Step(_)));
    assert!(err.to_string().contains("already exists"), "{err}");
    Ok(())
}

#[test]
fn queries_release_native_memory() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Rc::new(RusqliteEngine::new());
    let db = Connection::open_with_exports(engine.clone(), &OpenOptions::default())?;
    db.execute_batch("CREATE TABLE t (s TEXT, b BLOB)")?;
    let baseline = engine.live_allocations();

    for i in 0_u8..10 {
        db.execute(
            "INSERT INTO t VALUES (?, ?)",
            params![format!("row {i}"), vec![i; 32]],
        )?;
    }
    let rows = db.query("SELECT s, b FROM t", ())?.collect_rows()?;
    assert_eq!(rows.len(), 10);

    // Abandon a cursor mid-iteration.
    let mut partial = db.query("SELECT s FROM t", ())?;
    assert!(partial.next().is_some());
    drop(partial);

    assert_eq!(engine.live_allocations(), baseline);
    assert_eq!(engine.live_statements(), 0);
    Ok(())
}

#[test]
fn empty_path_is_a_config_error() {
    let options = OpenOptions::new("");
    let err = Connection::open_with(&options).unwrap_err();
    assert!(matches!(err, EmbedSqliteError::ConfigError(_)));
    assert_eq!(err.code(), None);
}
