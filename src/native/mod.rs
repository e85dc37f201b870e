// Native module boundary
//
// - `NativeExports`: the fixed export table of a compiled SQLite module
// - memory: byte-vector linear memory with a first-fit allocator
// - engine: `NativeExports` implemented on the bundled SQLite via rusqlite

pub mod engine;
pub mod memory;

pub use engine::RusqliteEngine;
pub use memory::LinearMemory;

/// Export table of a native SQLite module.
///
/// Every call takes and returns plain integers or pointers into the module's
/// linear memory; strings and byte buffers only cross through
/// [`marshal`](crate::marshal). Statement handles are non-zero `i32`s and a
/// zero pointer is null. Status-returning calls yield a
/// [`Status`](crate::Status) code, and the text for the most recent failure is
/// available through [`get_sqlite_error_str`](Self::get_sqlite_error_str).
///
/// One instance backs exactly one database connection. Implementations are
/// not required to be thread-safe.
pub trait NativeExports {
    /// Allocate `size` bytes of linear memory. Returns 0 when out of memory.
    fn malloc(&self, size: i32) -> i32;
    fn free(&self, ptr: i32);
    /// Copy up to `len` bytes starting at `ptr`; shorter when the range runs
    /// past the end of memory.
    fn memory_read(&self, ptr: i32, len: usize) -> Vec<u8>;
    /// Returns `false` when the range is not inside an allocation.
    fn memory_write(&self, ptr: i32, data: &[u8]) -> bool;

    fn open(&self, filename: i32, flags: i32) -> i32;
    fn close(&self) -> i32;
    /// Run one or more `;`-separated statements without producing rows.
    fn exec(&self, sql: i32) -> i32;

    /// Compile the NUL-terminated SQL at `sql`. Returns 0 on failure, with
    /// the reason in [`get_status`](Self::get_status).
    fn prepare(&self, sql: i32) -> i32;
    fn finalize(&self, stmt: i32) -> i32;
    fn step(&self, stmt: i32) -> i32;

    fn bind_int(&self, stmt: i32, idx: i32, value: i64) -> i32;
    fn bind_double(&self, stmt: i32, idx: i32, value: f64) -> i32;
    /// `value` points at a NUL-terminated decimal string.
    fn bind_big_int(&self, stmt: i32, idx: i32, value: i32) -> i32;
    fn bind_text(&self, stmt: i32, idx: i32, value: i32) -> i32;
    fn bind_blob(&self, stmt: i32, idx: i32, value: i32, len: i32) -> i32;
    fn bind_null(&self, stmt: i32, idx: i32) -> i32;
    /// 1-based index of the named parameter, or 0 when there is none.
    fn bind_parameter_index(&self, stmt: i32, name: i32) -> i32;

    fn column_count(&self, stmt: i32) -> i32;
    fn column_name(&self, stmt: i32, col: i32) -> i32;
    fn column_type(&self, stmt: i32, col: i32) -> i32;
    fn column_int(&self, stmt: i32, col: i32) -> i64;
    fn column_double(&self, stmt: i32, col: i32) -> f64;
    fn column_text(&self, stmt: i32, col: i32) -> i32;
    fn column_blob(&self, stmt: i32, col: i32) -> i32;
    fn column_bytes(&self, stmt: i32, col: i32) -> i32;

    fn last_insert_rowid(&self) -> i64;
    fn changes(&self) -> i32;
    fn total_changes(&self) -> i32;

    /// Status of the most recent call.
    fn get_status(&self) -> i32;
    /// Pointer to a NUL-terminated, module-owned description of the most
    /// recent failure. The caller must not free it.
    fn get_sqlite_error_str(&self) -> i32;
}
