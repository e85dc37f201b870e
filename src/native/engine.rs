use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Batch, Connection, OpenFlags, Statement};

use super::NativeExports;
use super::memory::{DEFAULT_MEMORY_LIMIT, LinearMemory};
use crate::constants::{ColumnType, Status};

/// A failed native call: status code plus the text reported through
/// `get_sqlite_error_str`.
#[derive(Debug)]
struct Failure {
    code: i32,
    message: String,
}

impl Failure {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            code: status.code(),
            message: message.into(),
        }
    }

    fn misuse(message: &str) -> Self {
        Self::new(Status::Misuse, message)
    }

    fn not_open() -> Self {
        Self::misuse("database is not open")
    }
}

impl From<rusqlite::Error> for Failure {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ffi_err, message) => Self {
                code: ffi_err.extended_code & 0xff,
                message: message.unwrap_or_else(|| ffi_err.to_string()),
            },
            other => Self::new(Status::Error, other.to_string()),
        }
    }
}

/// One buffered column value. Text keeps the bytes SQLite stored, which are
/// not guaranteed to be UTF-8.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for Cell {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(i) => Cell::Integer(i),
            ValueRef::Real(f) => Cell::Real(f),
            ValueRef::Text(bytes) => Cell::Text(bytes.to_vec()),
            ValueRef::Blob(bytes) => Cell::Blob(bytes.to_vec()),
        }
    }
}

/// Host-side state behind one native statement handle.
#[derive(Debug)]
struct NativeStatement {
    sql: String,
    parameter_names: Vec<Option<String>>,
    column_names: Vec<String>,
    bindings: Vec<Value>,
    // None until the first step executes the statement
    pending: Option<VecDeque<Vec<Cell>>>,
    current: Option<Vec<Cell>>,
    // column text/blob copies, valid until the next step
    row_buffers: Vec<i32>,
    // column name copies, valid until finalize
    name_buffers: Vec<i32>,
}

impl NativeStatement {
    fn value(&self, col: i32) -> Option<&Cell> {
        let col = usize::try_from(col).ok()?;
        self.current.as_ref()?.get(col)
    }
}

#[derive(Debug)]
struct EngineState {
    conn: Option<Connection>,
    memory: LinearMemory,
    statements: HashMap<i32, NativeStatement>,
    next_handle: i32,
    status: i32,
    last_error: String,
    error_buffer: i32,
}

/// [`NativeExports`] implemented on the bundled SQLite library.
///
/// Prepared statements are validated against SQLite at `prepare` time and run
/// on their first `step`; the produced rows are buffered and handed out one
/// `step` at a time. Column text and blobs are copied into linear memory the
/// way a WASM build would return them.
#[derive(Debug)]
pub struct RusqliteEngine {
    state: RefCell<EngineState>,
}

impl RusqliteEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_memory_limit(DEFAULT_MEMORY_LIMIT)
    }

    /// Engine whose linear memory never grows past `limit` bytes.
    #[must_use]
    pub fn with_memory_limit(limit: usize) -> Self {
        Self {
            state: RefCell::new(EngineState {
                conn: None,
                memory: LinearMemory::new(limit),
                statements: HashMap::new(),
                next_handle: 1,
                status: Status::Ok.code(),
                last_error: "not an error".to_string(),
                error_buffer: 0,
            }),
        }
    }

    /// Number of statement handles not yet finalized.
    #[must_use]
    pub fn live_statements(&self) -> usize {
        self.state.borrow().statements.len()
    }

    /// Number of live linear-memory allocations, engine-owned ones included.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.borrow().memory.live_blocks()
    }
}

impl Default for RusqliteEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn text_of(memory: &LinearMemory, ptr: i32) -> String {
    String::from_utf8_lossy(memory.read_cstr(ptr)).into_owned()
}

// Whitespace, comments and bare `;` compile to no statement at all.
fn first_statement<'conn>(
    conn: &'conn Connection,
    sql: &str,
) -> Result<Statement<'conn>, Failure> {
    Batch::new(conn, sql)
        .next()?
        .ok_or_else(|| Failure::new(Status::Error, "not an SQL statement"))
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    bindings: &[Value],
) -> Result<VecDeque<Vec<Cell>>, Failure> {
    let mut stmt = first_statement(conn, sql)?;
    for (idx, value) in bindings.iter().enumerate() {
        stmt.raw_bind_parameter(idx + 1, value)?;
    }
    let column_count = stmt.column_count();
    let mut rows = stmt.raw_query();
    let mut buffered = VecDeque::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(Cell::from(row.get_ref(idx)?));
        }
        buffered.push_back(values);
    }
    Ok(buffered)
}

fn value_bytes(value: &Cell) -> Option<Vec<u8>> {
    match value {
        Cell::Null => None,
        Cell::Integer(i) => Some(i.to_string().into_bytes()),
        Cell::Real(f) => Some(f.to_string().into_bytes()),
        Cell::Text(bytes) | Cell::Blob(bytes) => Some(bytes.clone()),
    }
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

impl EngineState {
    fn record(&mut self, outcome: Result<i32, Failure>) -> i32 {
        match outcome {
            Ok(code) => {
                self.status = code;
                code
            }
            Err(failure) => {
                self.status = failure.code;
                self.last_error = failure.message;
                failure.code
            }
        }
    }

    // Like `record`, but the success value is a handle or index rather than a status.
    fn record_value(&mut self, outcome: Result<i32, Failure>) -> i32 {
        match outcome {
            Ok(value) => {
                self.status = Status::Ok.code();
                value
            }
            Err(failure) => {
                self.record(Err(failure));
                0
            }
        }
    }

    fn statement(&mut self, stmt: i32) -> Result<&mut NativeStatement, Failure> {
        self.statements
            .get_mut(&stmt)
            .ok_or_else(|| Failure::misuse("bad statement handle"))
    }

    fn open(&mut self, filename: i32, flags: i32) -> Result<i32, Failure> {
        if self.conn.is_some() {
            return Err(Failure::misuse("database is already open"));
        }
        let path = text_of(&self.memory, filename);
        let conn = Connection::open_with_flags(&path, OpenFlags::from_bits_truncate(flags))?;
        self.conn = Some(conn);
        Ok(Status::Ok.code())
    }

    fn close(&mut self) -> Result<i32, Failure> {
        if !self.statements.is_empty() {
            return Err(Failure::new(
                Status::Busy,
                "unable to close due to unfinalized statements or unfinished backups",
            ));
        }
        if let Some(conn) = self.conn.take() {
            if let Err((conn, err)) = conn.close() {
                self.conn = Some(conn);
                return Err(err.into());
            }
        }
        Ok(Status::Ok.code())
    }

    fn exec(&mut self, sql: i32) -> Result<i32, Failure> {
        let sql = text_of(&self.memory, sql);
        let conn = self.conn.as_ref().ok_or_else(Failure::not_open)?;
        conn.execute_batch(&sql)?;
        Ok(Status::Ok.code())
    }

    fn prepare(&mut self, sql: i32) -> Result<i32, Failure> {
        let sql = text_of(&self.memory, sql);
        let conn = self.conn.as_ref().ok_or_else(Failure::not_open)?;
        let stmt = first_statement(conn, &sql)?;
        let parameter_names = (1..=stmt.parameter_count())
            .map(|idx| stmt.parameter_name(idx).map(str::to_string))
            .collect::<Vec<_>>();
        let column_names = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>();
        drop(stmt);

        let handle = self.next_handle;
        self.next_handle = self.next_handle.checked_add(1).unwrap_or(1);
        self.statements.insert(
            handle,
            NativeStatement {
                sql,
                bindings: vec![Value::Null; parameter_names.len()],
                parameter_names,
                column_names,
                pending: None,
                current: None,
                row_buffers: Vec::new(),
                name_buffers: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn finalize(&mut self, stmt: i32) -> Result<i32, Failure> {
        let statement = self
            .statements
            .remove(&stmt)
            .ok_or_else(|| Failure::misuse("bad statement handle"))?;
        for ptr in statement
            .row_buffers
            .into_iter()
            .chain(statement.name_buffers)
        {
            self.memory.free(ptr);
        }
        Ok(Status::Ok.code())
    }

    fn step(&mut self, stmt: i32) -> Result<i32, Failure> {
        let conn = self.conn.as_ref().ok_or_else(Failure::not_open)?;
        let statement = self
            .statements
            .get_mut(&stmt)
            .ok_or_else(|| Failure::misuse("bad statement handle"))?;
        for ptr in statement.row_buffers.drain(..) {
            self.memory.free(ptr);
        }
        if statement.pending.is_none() {
            match run_statement(conn, &statement.sql, &statement.bindings) {
                Ok(rows) => statement.pending = Some(rows),
                Err(failure) => {
                    statement.pending = Some(VecDeque::new());
                    statement.current = None;
                    return Err(failure);
                }
            }
        }
        statement.current = statement.pending.as_mut().and_then(VecDeque::pop_front);
        if statement.current.is_some() {
            Ok(Status::Row.code())
        } else {
            Ok(Status::Done.code())
        }
    }

    fn bind(&mut self, stmt: i32, idx: i32, value: Value) -> Result<i32, Failure> {
        let statement = self.statement(stmt)?;
        if statement.pending.is_some() {
            return Err(Failure::misuse("statement already executed"));
        }
        let slot = usize::try_from(idx)
            .ok()
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| statement.bindings.get_mut(idx))
            .ok_or_else(|| Failure::new(Status::Range, "column index out of range"))?;
        *slot = value;
        Ok(Status::Ok.code())
    }

    fn bind_big_int(&mut self, stmt: i32, idx: i32, value: i32) -> Result<i32, Failure> {
        let text = text_of(&self.memory, value);
        let parsed = text.trim().parse::<i64>().map_err(|_| {
            Failure::new(Status::Range, format!("integer value out of range: {text}"))
        })?;
        self.bind(stmt, idx, Value::Integer(parsed))
    }

    fn bind_blob(&mut self, stmt: i32, idx: i32, value: i32, len: i32) -> Result<i32, Failure> {
        let len = usize::try_from(len).map_err(|_| Failure::misuse("negative blob length"))?;
        let bytes = self.memory.read(value, len).to_vec();
        if bytes.len() != len {
            return Err(Failure::misuse("blob pointer outside linear memory"));
        }
        self.bind(stmt, idx, Value::Blob(bytes))
    }

    fn bind_parameter_index(&mut self, stmt: i32, name: i32) -> Result<i32, Failure> {
        let name = text_of(&self.memory, name);
        let statement = self.statement(stmt)?;
        let position = statement
            .parameter_names
            .iter()
            .position(|candidate| candidate.as_deref() == Some(name.as_str()));
        Ok(position.map_or(0, |idx| i32::try_from(idx + 1).unwrap_or(0)))
    }

    fn column_name(&mut self, stmt: i32, col: i32) -> Result<i32, Failure> {
        let statement = self
            .statements
            .get_mut(&stmt)
            .ok_or_else(|| Failure::misuse("bad statement handle"))?;
        let Some(name) = usize::try_from(col)
            .ok()
            .and_then(|col| statement.column_names.get(col))
            .cloned()
        else {
            return Ok(0);
        };
        let ptr = self.memory.alloc_bytes(name.as_bytes(), true);
        if ptr == 0 {
            return Err(Failure::new(Status::NoMem, "out of memory"));
        }
        statement.name_buffers.push(ptr);
        Ok(ptr)
    }

    // Copy the current value of `col` into linear memory.
    fn column_buffer(&mut self, stmt: i32, col: i32, nul_terminate: bool) -> Result<i32, Failure> {
        let statement = self
            .statements
            .get_mut(&stmt)
            .ok_or_else(|| Failure::misuse("bad statement handle"))?;
        let Some(bytes) = statement.value(col).and_then(value_bytes) else {
            return Ok(0);
        };
        if bytes.is_empty() && !nul_terminate {
            return Ok(0);
        }
        let ptr = self.memory.alloc_bytes(&bytes, nul_terminate);
        if ptr == 0 {
            return Err(Failure::new(Status::NoMem, "out of memory"));
        }
        statement.row_buffers.push(ptr);
        Ok(ptr)
    }

    fn error_str(&mut self) -> i32 {
        self.memory.free(self.error_buffer);
        self.error_buffer = self.memory.alloc_bytes(self.last_error.as_bytes(), true);
        self.error_buffer
    }
}

impl NativeExports for RusqliteEngine {
    fn malloc(&self, size: i32) -> i32 {
        match usize::try_from(size) {
            Ok(size) => self.state.borrow_mut().memory.malloc(size),
            Err(_) => 0,
        }
    }

    fn free(&self, ptr: i32) {
        self.state.borrow_mut().memory.free(ptr);
    }

    fn memory_read(&self, ptr: i32, len: usize) -> Vec<u8> {
        self.state.borrow().memory.read(ptr, len).to_vec()
    }

    fn memory_write(&self, ptr: i32, data: &[u8]) -> bool {
        self.state.borrow_mut().memory.write(ptr, data)
    }

    fn open(&self, filename: i32, flags: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.open(filename, flags);
        state.record(outcome)
    }

    fn close(&self) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.close();
        state.record(outcome)
    }

    fn exec(&self, sql: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.exec(sql);
        state.record(outcome)
    }

    fn prepare(&self, sql: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.prepare(sql);
        state.record_value(outcome)
    }

    fn finalize(&self, stmt: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.finalize(stmt);
        state.record(outcome)
    }

    fn step(&self, stmt: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.step(stmt);
        state.record(outcome)
    }

    fn bind_int(&self, stmt: i32, idx: i32, value: i64) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind(stmt, idx, Value::Integer(value));
        state.record(outcome)
    }

    fn bind_double(&self, stmt: i32, idx: i32, value: f64) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind(stmt, idx, Value::Real(value));
        state.record(outcome)
    }

    fn bind_big_int(&self, stmt: i32, idx: i32, value: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind_big_int(stmt, idx, value);
        state.record(outcome)
    }

    fn bind_text(&self, stmt: i32, idx: i32, value: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let text = text_of(&state.memory, value);
        let outcome = state.bind(stmt, idx, Value::Text(text));
        state.record(outcome)
    }

    fn bind_blob(&self, stmt: i32, idx: i32, value: i32, len: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind_blob(stmt, idx, value, len);
        state.record(outcome)
    }

    fn bind_null(&self, stmt: i32, idx: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind(stmt, idx, Value::Null);
        state.record(outcome)
    }

    fn bind_parameter_index(&self, stmt: i32, name: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.bind_parameter_index(stmt, name);
        state.record_value(outcome)
    }

    fn column_count(&self, stmt: i32) -> i32 {
        self.state
            .borrow()
            .statements
            .get(&stmt)
            .map_or(0, |s| i32::try_from(s.column_names.len()).unwrap_or(i32::MAX))
    }

    fn column_name(&self, stmt: i32, col: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.column_name(stmt, col);
        state.record_value(outcome)
    }

    fn column_type(&self, stmt: i32, col: i32) -> i32 {
        let state = self.state.borrow();
        let kind = match state.statements.get(&stmt).and_then(|s| s.value(col)) {
            Some(Cell::Integer(_)) => ColumnType::Integer,
            Some(Cell::Real(_)) => ColumnType::Float,
            Some(Cell::Text(_)) => ColumnType::Text,
            Some(Cell::Blob(_)) => ColumnType::Blob,
            Some(Cell::Null) | None => ColumnType::Null,
        };
        kind.code()
    }

    fn column_int(&self, stmt: i32, col: i32) -> i64 {
        let state = self.state.borrow();
        match state.statements.get(&stmt).and_then(|s| s.value(col)) {
            Some(Cell::Integer(i)) => *i,
            #[allow(clippy::cast_possible_truncation)]
            Some(Cell::Real(f)) => *f as i64,
            Some(Cell::Text(bytes)) => parse_text(bytes).unwrap_or(0),
            _ => 0,
        }
    }

    fn column_double(&self, stmt: i32, col: i32) -> f64 {
        let state = self.state.borrow();
        match state.statements.get(&stmt).and_then(|s| s.value(col)) {
            Some(Cell::Real(f)) => *f,
            #[allow(clippy::cast_precision_loss)]
            Some(Cell::Integer(i)) => *i as f64,
            Some(Cell::Text(bytes)) => parse_text(bytes).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn column_text(&self, stmt: i32, col: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.column_buffer(stmt, col, true);
        state.record_value(outcome)
    }

    fn column_blob(&self, stmt: i32, col: i32) -> i32 {
        let mut state = self.state.borrow_mut();
        let outcome = state.column_buffer(stmt, col, false);
        state.record_value(outcome)
    }

    fn column_bytes(&self, stmt: i32, col: i32) -> i32 {
        let state = self.state.borrow();
        state
            .statements
            .get(&stmt)
            .and_then(|s| s.value(col))
            .and_then(value_bytes)
            .map_or(0, |bytes| i32::try_from(bytes.len()).unwrap_or(i32::MAX))
    }

    fn last_insert_rowid(&self) -> i64 {
        self.state
            .borrow()
            .conn
            .as_ref()
            .map_or(0, Connection::last_insert_rowid)
    }

    fn changes(&self) -> i32 {
        self.state
            .borrow()
            .conn
            .as_ref()
            .map_or(0, |conn| i32::try_from(conn.changes()).unwrap_or(i32::MAX))
    }

    fn total_changes(&self) -> i32 {
        let state = self.state.borrow();
        let Some(conn) = state.conn.as_ref() else {
            return 0;
        };
        conn.query_row("SELECT total_changes()", [], |row| row.get::<_, i64>(0))
            .map_or(0, |total| i32::try_from(total).unwrap_or(i32::MAX))
    }

    fn get_status(&self) -> i32 {
        self.state.borrow().status
    }

    fn get_sqlite_error_str(&self) -> i32 {
        self.state.borrow_mut().error_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstr(engine: &RusqliteEngine, text: &str) -> i32 {
        engine.state.borrow_mut().memory.alloc_bytes(text.as_bytes(), true)
    }

    fn open_memory() -> RusqliteEngine {
        let engine = RusqliteEngine::new();
        let path = cstr(&engine, ":memory:");
        let flags = crate::constants::open_flags::READWRITE | crate::constants::open_flags::CREATE;
        assert_eq!(engine.open(path, flags), Status::Ok.code());
        engine.free(path);
        engine
    }

    #[test]
    fn prepare_failure_sets_status_and_message() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELEC 1");
        assert_eq!(engine.prepare(sql), 0);
        assert_eq!(engine.get_status(), Status::Error.code());
        let msg = engine.get_sqlite_error_str();
        let text = text_of(&engine.state.borrow().memory, msg);
        assert!(text.contains("syntax error"), "{text}");
    }

    #[test]
    fn empty_sql_does_not_prepare() {
        let engine = open_memory();
        for text in ["", "   ", "-- only a comment", ";"] {
            let sql = cstr(&engine, text);
            assert_eq!(engine.prepare(sql), 0, "{text:?}");
            assert_eq!(engine.get_status(), Status::Error.code());
            engine.free(sql);
        }
        assert_eq!(engine.live_statements(), 0);
    }

    #[test]
    fn text_keeps_raw_bytes() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELECT CAST(x'ff41' AS TEXT), '12'");
        let stmt = engine.prepare(sql);
        assert_eq!(engine.step(stmt), Status::Row.code());
        assert_eq!(engine.column_type(stmt, 0), ColumnType::Text.code());
        assert_eq!(engine.column_bytes(stmt, 0), 2);
        let ptr = engine.column_text(stmt, 0);
        assert_eq!(engine.memory_read(ptr, 2), vec![0xff, 0x41]);
        assert_eq!(engine.column_int(stmt, 0), 0);
        assert_eq!(engine.column_int(stmt, 1), 12);
        engine.finalize(stmt);
    }

    #[test]
    fn step_walks_buffered_rows() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELECT 1 UNION ALL SELECT 2");
        let stmt = engine.prepare(sql);
        assert_ne!(stmt, 0);
        assert_eq!(engine.step(stmt), Status::Row.code());
        assert_eq!(engine.column_int(stmt, 0), 1);
        assert_eq!(engine.step(stmt), Status::Row.code());
        assert_eq!(engine.column_int(stmt, 0), 2);
        assert_eq!(engine.step(stmt), Status::Done.code());
        assert_eq!(engine.column_type(stmt, 0), ColumnType::Null.code());
        assert_eq!(engine.finalize(stmt), Status::Ok.code());
        assert_eq!(engine.finalize(stmt), Status::Misuse.code());
    }

    #[test]
    fn bind_out_of_range_is_reported() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELECT ?");
        let stmt = engine.prepare(sql);
        assert_eq!(engine.bind_int(stmt, 2, 5), Status::Range.code());
        assert_eq!(engine.bind_int(stmt, 0, 5), Status::Range.code());
        assert_eq!(engine.bind_int(stmt, 1, 5), Status::Ok.code());
        engine.finalize(stmt);
    }

    #[test]
    fn close_refuses_while_statements_live() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELECT 1");
        let stmt = engine.prepare(sql);
        assert_eq!(engine.close(), Status::Busy.code());
        engine.finalize(stmt);
        assert_eq!(engine.close(), Status::Ok.code());
    }

    #[test]
    fn column_buffers_are_released_on_step_and_finalize() {
        let engine = open_memory();
        let sql = cstr(&engine, "SELECT 'a' UNION ALL SELECT 'b'");
        let stmt = engine.prepare(sql);
        engine.free(sql);
        let baseline = engine.live_allocations();
        engine.step(stmt);
        engine.column_text(stmt, 0);
        engine.column_name(stmt, 0);
        assert_eq!(engine.live_allocations(), baseline + 2);
        engine.step(stmt);
        assert_eq!(engine.live_allocations(), baseline + 1);
        engine.finalize(stmt);
        assert_eq!(engine.live_allocations(), baseline);
    }
}
