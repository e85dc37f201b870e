use std::collections::HashMap;
use std::fmt;
use std::iter::FusedIterator;
use std::rc::Rc;
use std::sync::Arc;

use crate::connection::{ConnectionInner, CursorId};
use crate::constants::{ColumnType, Status};
use crate::error::{EmbedSqliteError, NativeError};
use crate::marshal;
use crate::native::NativeExports;
use crate::results::{Row, column_index};
use crate::types::Value;

/// Lifecycle of a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Positioned on a row that has not been read yet.
    Active,
    /// Every row was read; the statement is finalized.
    Exhausted,
    /// Closed before exhaustion, by the caller, a forced connection close, or
    /// a failed step.
    Closed,
}

/// An open result set.
///
/// Iterating yields each row once; the cursor cannot be rewound. The
/// statement is finalized as soon as the last row has been read, when
/// [`close`](Self::close) is called, or when the cursor is dropped.
pub struct Cursor {
    conn: Rc<ConnectionInner>,
    id: CursorId,
    columns: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    state: CursorState,
    // step failure raised after handing out the row read before it
    deferred: Option<EmbedSqliteError>,
    fused: bool,
}

fn read_column_names(exports: &dyn NativeExports, stmt: i32) -> Vec<String> {
    (0..exports.column_count(stmt))
        .map(|col| marshal::read_string(exports, exports.column_name(stmt, col)))
        .collect()
}

// Bytes of a text or blob column. A null pointer for a non-empty value means
// the engine could not copy it out.
fn read_column_bytes(
    exports: &dyn NativeExports,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, EmbedSqliteError> {
    if ptr == 0 && len > 0 {
        return Err(EmbedSqliteError::Step(NativeError::from_exports(
            exports,
            exports.get_status(),
        )));
    }
    Ok(marshal::read_bytes(exports, ptr, len))
}

fn read_value(
    exports: &dyn NativeExports,
    stmt: i32,
    col: i32,
) -> Result<Value, EmbedSqliteError> {
    let value = match ColumnType::from_code(exports.column_type(stmt, col)) {
        ColumnType::Integer => Value::Int(exports.column_int(stmt, col)),
        ColumnType::Float => Value::Float(exports.column_double(stmt, col)),
        ColumnType::Text => {
            let ptr = exports.column_text(stmt, col);
            let bytes = read_column_bytes(exports, ptr, exports.column_bytes(stmt, col))?;
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        ColumnType::Blob => {
            let ptr = exports.column_blob(stmt, col);
            Value::Blob(read_column_bytes(exports, ptr, exports.column_bytes(stmt, col))?)
        }
        ColumnType::Null => Value::Null,
    };
    Ok(value)
}

impl Cursor {
    /// Take ownership of the statement registered under `id`, which must be
    /// positioned on its first row.
    pub(crate) fn new(conn: Rc<ConnectionInner>, id: CursorId) -> Self {
        let columns = conn
            .statement(id)
            .map(|stmt| read_column_names(conn.exports(), stmt))
            .unwrap_or_default();
        let column_index = column_index(&columns);
        Self {
            conn,
            id,
            columns: Arc::new(columns),
            column_index,
            state: CursorState::Active,
            deferred: None,
            fused: false,
        }
    }

    /// Column names of the result set.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Current state. A cursor whose statement was finalized by a forced
    /// connection close reports `Closed`.
    #[must_use]
    pub fn state(&self) -> CursorState {
        match self.state {
            CursorState::Active if self.conn.statement(self.id).is_none() => CursorState::Closed,
            state => state,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == CursorState::Active
    }

    /// Read the current row and advance.
    ///
    /// Returns `Ok(None)` once exhausted.
    ///
    /// # Errors
    /// - [`EmbedSqliteError::UseAfterClose`] if the cursor was closed, or its
    ///   connection was force-closed, before exhaustion
    /// - [`EmbedSqliteError::Step`] if advancing failed; the row read before
    ///   the failure is still returned, and the error surfaces on the next call
    /// - [`EmbedSqliteError::Step`] if a column could not be copied out of
    ///   native memory; the cursor is closed
    pub fn next_row(&mut self) -> Result<Option<Row>, EmbedSqliteError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        match self.state {
            CursorState::Active => {}
            CursorState::Exhausted => return Ok(None),
            CursorState::Closed => return Err(EmbedSqliteError::cursor_closed()),
        }
        let Some(stmt) = self.conn.statement(self.id) else {
            // finalized by a forced close of the connection
            self.state = CursorState::Closed;
            return Err(EmbedSqliteError::cursor_closed());
        };

        let exports = self.conn.exports();
        let values = (0..i32::try_from(self.columns.len()).unwrap_or(i32::MAX))
            .map(|col| read_value(exports, stmt, col))
            .collect::<Result<Vec<_>, _>>();
        let values = match values {
            Ok(values) => values,
            Err(err) => {
                self.conn.finalize_cursor(self.id);
                self.state = CursorState::Closed;
                return Err(err);
            }
        };
        let row = Row::with_index(
            Arc::clone(&self.columns),
            Arc::clone(&self.column_index),
            values,
        );

        let status = exports.step(stmt);
        if status == Status::Done.code() {
            self.conn.finalize_cursor(self.id);
            self.state = CursorState::Exhausted;
        } else if status != Status::Row.code() {
            self.deferred = Some(EmbedSqliteError::Step(NativeError::from_exports(
                exports, status,
            )));
            self.conn.finalize_cursor(self.id);
            self.state = CursorState::Closed;
        }
        Ok(Some(row))
    }

    /// Close the cursor, finalizing its statement. Calling this again, or after
    /// the cursor was exhausted, does nothing.
    pub fn close(&mut self) {
        if self.state == CursorState::Active {
            self.conn.finalize_cursor(self.id);
            self.state = CursorState::Closed;
        }
    }
}

impl Iterator for Cursor {
    type Item = Result<Row, EmbedSqliteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.fused = true;
                None
            }
            Err(err) => {
                self.fused = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Cursor {}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("columns", &self.columns)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Result of [`Connection::query`](crate::Connection::query).
#[derive(Debug)]
pub enum Rows {
    /// The statement finished without producing a row; nothing is held open.
    Empty,
    Cursor(Cursor),
}

impl Rows {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Rows::Empty)
    }

    /// Column names; empty for [`Rows::Empty`].
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Rows::Empty => &[],
            Rows::Cursor(cursor) => cursor.columns(),
        }
    }

    /// Close the underlying cursor, if any.
    pub fn close(&mut self) {
        if let Rows::Cursor(cursor) = self {
            cursor.close();
        }
    }

    #[must_use]
    pub fn into_cursor(self) -> Option<Cursor> {
        match self {
            Rows::Empty => None,
            Rows::Cursor(cursor) => Some(cursor),
        }
    }

    /// Drain every remaining row.
    ///
    /// # Errors
    /// Returns the first error raised while stepping.
    pub fn collect_rows(self) -> Result<Vec<Row>, EmbedSqliteError> {
        self.collect()
    }
}

impl Iterator for Rows {
    type Item = Result<Row, EmbedSqliteError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Rows::Empty => None,
            Rows::Cursor(cursor) => cursor.next(),
        }
    }
}

impl FusedIterator for Rows {}
