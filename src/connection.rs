use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::{MEMORY_PATH, OpenOptions};
use crate::constants::Status;
use crate::cursor::{Cursor, Rows};
use crate::error::{EmbedSqliteError, NativeError};
use crate::marshal;
use crate::native::{NativeExports, RusqliteEngine};
use crate::params::{Params, bind_params};

/// Key of a registered cursor. Cursors hold keys; the registry holds the raw
/// statement handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CursorId(u64);

/// Statement handles of the cursors that are still open.
#[derive(Debug, Default)]
pub(crate) struct CursorRegistry {
    live: BTreeMap<CursorId, i32>,
    next_id: u64,
}

impl CursorRegistry {
    fn register(&mut self, stmt: i32) -> CursorId {
        let id = CursorId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, stmt);
        id
    }

    /// Remove `id`, handing back its handle the first time only.
    fn release(&mut self, id: CursorId) -> Option<i32> {
        self.live.remove(&id)
    }

    fn get(&self, id: CursorId) -> Option<i32> {
        self.live.get(&id).copied()
    }

    fn ids(&self) -> Vec<CursorId> {
        self.live.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

/// State shared between a [`Connection`] and the cursors it hands out.
pub(crate) struct ConnectionInner {
    exports: Rc<dyn NativeExports>,
    open: Cell<bool>,
    registry: RefCell<CursorRegistry>,
}

impl ConnectionInner {
    pub(crate) fn exports(&self) -> &dyn NativeExports {
        &*self.exports
    }

    /// Handle of a still-registered cursor.
    pub(crate) fn statement(&self, id: CursorId) -> Option<i32> {
        self.registry.borrow().get(id)
    }

    /// Deregister `id` and finalize its statement. Only the first call for a
    /// given id reaches native `finalize`; returns whether this call did.
    pub(crate) fn finalize_cursor(&self, id: CursorId) -> bool {
        let Some(stmt) = self.registry.borrow_mut().release(id) else {
            return false;
        };
        finalize_statement(&*self.exports, stmt);
        true
    }
}

/// Finalize `stmt`, logging the outcome. Returns whether native `finalize`
/// reported success.
fn finalize_statement(exports: &dyn NativeExports, stmt: i32) -> bool {
    let status = exports.finalize(stmt);
    if status == Status::Ok.code() {
        debug!(stmt, "finalized statement");
        true
    } else {
        warn!(stmt, status, "finalize reported failure");
        false
    }
}

/// Finalizes a freshly prepared statement unless ownership moves on to a
/// cursor via [`into_raw`](Self::into_raw).
struct PreparedStatement<'a> {
    exports: &'a dyn NativeExports,
    stmt: i32,
}

impl PreparedStatement<'_> {
    fn into_raw(self) -> i32 {
        let stmt = self.stmt;
        std::mem::forget(self);
        stmt
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        finalize_statement(self.exports, self.stmt);
    }
}

/// A database connection bound to one native engine instance.
///
/// Single-threaded: the connection and its cursors share state through `Rc`.
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    /// Open (creating if needed) the database at `path`. `":memory:"` opens a
    /// non-persistent database.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::Open`] if the native open call fails.
    pub fn open(path: impl Into<String>) -> Result<Self, EmbedSqliteError> {
        Self::open_with(&OpenOptions::new(path))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::Open`] if the native open call fails.
    pub fn open_in_memory() -> Result<Self, EmbedSqliteError> {
        Self::open(MEMORY_PATH)
    }

    /// Open with explicit options on the default native engine.
    ///
    /// # Errors
    /// Returns `EmbedSqliteError` if the options are invalid or native `open` fails.
    pub fn open_with(options: &OpenOptions) -> Result<Self, EmbedSqliteError> {
        Self::open_with_exports(Rc::new(RusqliteEngine::new()), options)
    }

    /// Open on a caller-supplied native module instance. The instance must not
    /// back any other connection.
    ///
    /// # Errors
    /// Returns `EmbedSqliteError` if the options are invalid or native `open` fails.
    pub fn open_with_exports(
        exports: Rc<dyn NativeExports>,
        options: &OpenOptions,
    ) -> Result<Self, EmbedSqliteError> {
        let target = options.target()?;
        let flags = options.flags();
        let status = marshal::with_string(&*exports, target, |ptr| exports.open(ptr, flags))
            .map_err(EmbedSqliteError::Open)?;
        if status != Status::Ok.code() {
            return Err(EmbedSqliteError::Open(NativeError::from_exports(
                &*exports, status,
            )));
        }
        debug!(path = target, flags, "opened database");
        Ok(Self {
            inner: Rc::new(ConnectionInner {
                exports,
                open: Cell::new(true),
                registry: RefCell::new(CursorRegistry::default()),
            }),
        })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.get()
    }

    /// Number of cursors handed out by `query` that are not closed yet.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Run `sql` with `params` and return its rows.
    ///
    /// Statements that produce no rows (DDL, plain DML, or a `SELECT` matching
    /// nothing) return [`Rows::Empty`] and leave nothing open. Otherwise the
    /// returned cursor keeps a statement open until it is exhausted, closed or
    /// dropped.
    ///
    /// # Errors
    /// - [`EmbedSqliteError::UseAfterClose`] if the connection was closed
    /// - [`EmbedSqliteError::Prepare`] if the SQL does not compile
    /// - [`EmbedSqliteError::Bind`] for a rejected value or unknown parameter name
    /// - [`EmbedSqliteError::Step`] if the first step fails
    pub fn query(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Rows, EmbedSqliteError> {
        if !self.is_open() {
            return Err(EmbedSqliteError::database_closed());
        }
        let params = params.into();
        let exports = self.inner.exports();

        let stmt = marshal::with_string(exports, sql, |ptr| exports.prepare(ptr))
            .map_err(EmbedSqliteError::Prepare)?;
        if stmt == 0 {
            let status = exports.get_status();
            return Err(EmbedSqliteError::Prepare(NativeError::from_exports(
                exports, status,
            )));
        }
        debug!(stmt, sql, "prepared statement");
        let prepared = PreparedStatement { exports, stmt };

        bind_params(exports, stmt, &params)?;

        let status = exports.step(stmt);
        if status == Status::Done.code() {
            return Ok(Rows::Empty);
        }
        if status != Status::Row.code() {
            return Err(EmbedSqliteError::Step(NativeError::from_exports(
                exports, status,
            )));
        }

        let stmt = prepared.into_raw();
        let id = self.inner.registry.borrow_mut().register(stmt);
        Ok(Rows::Cursor(Cursor::new(Rc::clone(&self.inner), id)))
    }

    /// Run `sql`, discard any rows, and return the number of rows it changed.
    ///
    /// # Errors
    /// Same as [`query`](Self::query), plus any error raised while draining rows.
    pub fn execute(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<i32, EmbedSqliteError> {
        for row in self.query(sql, params)? {
            row?;
        }
        Ok(self.changes())
    }

    /// Run one or more `;`-separated statements that take no parameters.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::UseAfterClose`] on a closed connection, or
    /// [`EmbedSqliteError::Step`] carrying the native failure.
    pub fn execute_batch(&self, sql: &str) -> Result<(), EmbedSqliteError> {
        if !self.is_open() {
            return Err(EmbedSqliteError::database_closed());
        }
        let exports = self.inner.exports();
        let status = marshal::with_string(exports, sql, |ptr| exports.exec(ptr))
            .map_err(EmbedSqliteError::Step)?;
        if status != Status::Ok.code() {
            return Err(EmbedSqliteError::Step(NativeError::from_exports(
                exports, status,
            )));
        }
        Ok(())
    }

    /// Close the connection.
    ///
    /// With `force`, every open cursor is closed first. Without it, open
    /// cursors make the native close fail and the connection stays open.
    /// Closing an already closed connection does nothing.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::Close`] if the native close call fails.
    pub fn close(&self, force: bool) -> Result<(), EmbedSqliteError> {
        if !self.is_open() {
            return Ok(());
        }
        if force {
            let ids = self.inner.registry.borrow().ids();
            for id in ids {
                self.inner.finalize_cursor(id);
            }
        }
        let exports = self.inner.exports();
        let status = exports.close();
        if status != Status::Ok.code() {
            return Err(EmbedSqliteError::Close(NativeError::from_exports(
                exports, status,
            )));
        }
        self.inner.open.set(false);
        debug!(force, "closed database");
        Ok(())
    }

    /// Row id of the most recent successful `INSERT`.
    #[must_use]
    pub fn last_insert_row_id(&self) -> i64 {
        self.inner.exports().last_insert_rowid()
    }

    /// Rows changed by the most recent `INSERT`, `UPDATE` or `DELETE`.
    #[must_use]
    pub fn changes(&self) -> i32 {
        self.inner.exports().changes()
    }

    /// Rows changed since the connection was opened.
    #[must_use]
    pub fn total_changes(&self) -> i32 {
        self.inner.exports().total_changes()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close(true) {
            warn!(error = %err, "failed to close database on drop");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("open_cursors", &self.open_cursors())
            .finish()
    }
}
