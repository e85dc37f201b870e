#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use embed_sqlite::{Connection, NativeExports, OpenOptions, RusqliteEngine};

/// Wraps the default engine and records every `finalize` call per handle.
#[derive(Default)]
pub struct CountingExports {
    pub inner: RusqliteEngine,
    pub prepared: RefCell<Vec<i32>>,
    pub finalized: RefCell<HashMap<i32, usize>>,
    /// Number of successful steps to allow before `step` reports SQLITE_ERROR.
    pub fail_step_after: Cell<Option<usize>>,
}

impl CountingExports {
    /// Every prepared handle was finalized exactly once.
    pub fn assert_each_finalized_once(&self) {
        let finalized = self.finalized.borrow();
        for stmt in self.prepared.borrow().iter() {
            assert_eq!(
                finalized.get(stmt).copied(),
                Some(1),
                "statement {stmt} should be finalized exactly once"
            );
        }
        assert_eq!(self.inner.live_statements(), 0);
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalized.borrow().values().sum()
    }
}

pub fn open_counting() -> Result<(Connection, Rc<CountingExports>), Box<dyn std::error::Error>> {
    let exports = Rc::new(CountingExports::default());
    let conn = Connection::open_with_exports(exports.clone(), &OpenOptions::default())?;
    Ok((conn, exports))
}

impl NativeExports for CountingExports {
    fn malloc(&self, size: i32) -> i32 {
        self.inner.malloc(size)
    }
    fn free(&self, ptr: i32) {
        self.inner.free(ptr);
    }
    fn memory_read(&self, ptr: i32, len: usize) -> Vec<u8> {
        self.inner.memory_read(ptr, len)
    }
    fn memory_write(&self, ptr: i32, data: &[u8]) -> bool {
        self.inner.memory_write(ptr, data)
    }
    fn open(&self, filename: i32, flags: i32) -> i32 {
        self.inner.open(filename, flags)
    }
    fn close(&self) -> i32 {
        self.inner.close()
    }
    fn exec(&self, sql: i32) -> i32 {
        self.inner.exec(sql)
    }
    fn prepare(&self, sql: i32) -> i32 {
        let stmt = self.inner.prepare(sql);
        if stmt != 0 {
            self.prepared.borrow_mut().push(stmt);
        }
        stmt
    }
    fn finalize(&self, stmt: i32) -> i32 {
        *self.finalized.borrow_mut().entry(stmt).or_default() += 1;
        self.inner.finalize(stmt)
    }
    fn step(&self, stmt: i32) -> i32 {
        match self.fail_step_after.get() {
            Some(0) => {
                self.fail_step_after.set(None);
                1
            }
            Some(n) => {
                self.fail_step_after.set(Some(n - 1));
                self.inner.step(stmt)
            }
            None => self.inner.step(stmt),
        }
    }
    fn bind_int(&self, stmt: i32, idx: i32, value: i64) -> i32 {
        self.inner.bind_int(stmt, idx, value)
    }
    fn bind_double(&self, stmt: i32, idx: i32, value: f64) -> i32 {
        self.inner.bind_double(stmt, idx, value)
    }
    fn bind_big_int(&self, stmt: i32, idx: i32, value: i32) -> i32 {
        self.inner.bind_big_int(stmt, idx, value)
    }
    fn bind_text(&self, stmt: i32, idx: i32, value: i32) -> i32 {
        self.inner.bind_text(stmt, idx, value)
    }
    fn bind_blob(&self, stmt: i32, idx: i32, value: i32, len: i32) -> i32 {
        self.inner.bind_blob(stmt, idx, value, len)
    }
    fn bind_null(&self, stmt: i32, idx: i32) -> i32 {
        self.inner.bind_null(stmt, idx)
    }
    fn bind_parameter_index(&self, stmt: i32, name: i32) -> i32 {
        self.inner.bind_parameter_index(stmt, name)
    }
    fn column_count(&self, stmt: i32) -> i32 {
        self.inner.column_count(stmt)
    }
    fn column_name(&self, stmt: i32, col: i32) -> i32 {
        self.inner.column_name(stmt, col)
    }
    fn column_type(&self, stmt: i32, col: i32) -> i32 {
        self.inner.column_type(stmt, col)
    }
    fn column_int(&self, stmt: i32, col: i32) -> i64 {
        self.inner.column_int(stmt, col)
    }
    fn column_double(&self, stmt: i32, col: i32) -> f64 {
        self.inner.column_double(stmt, col)
    }
    fn column_text(&self, stmt: i32, col: i32) -> i32 {
        self.inner.column_text(stmt, col)
    }
    fn column_blob(&self, stmt: i32, col: i32) -> i32 {
        self.inner.column_blob(stmt, col)
    }
    fn column_bytes(&self, stmt: i32, col: i32) -> i32 {
        self.inner.column_bytes(stmt, col)
    }
    fn last_insert_rowid(&self) -> i64 {
        self.inner.last_insert_rowid()
    }
    fn changes(&self) -> i32 {
        self.inner.changes()
    }
    fn total_changes(&self) -> i32 {
        self.inner.total_changes()
    }
    fn get_status(&self) -> i32 {
        self.inner.get_status()
    }
    fn get_sqlite_error_str(&self) -> i32 {
        self.inner.get_sqlite_error_str()
    }
}
