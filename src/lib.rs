//! Synchronous SQLite query orchestration over a native module's export table.
//!
//! A [`Connection`] drives one [`NativeExports`] instance (a compiled SQLite
//! exposing integer-only calls, such as a WASM build, or the bundled
//! [`RusqliteEngine`]). `query` prepares SQL, binds [`Params`], steps once and
//! hands back either [`Rows::Empty`] or a live [`Cursor`] that owns the
//! statement handle until it is exhausted, closed or dropped.
//!
//! ```rust
//! use embed_sqlite::prelude::*;
//!
//! # fn main() -> Result<(), EmbedSqliteError> {
//! let db = Connection::open_in_memory()?;
//! db.execute_batch("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT)")?;
//! db.query("INSERT INTO people (name) VALUES (?)", params!["alice"])?;
//! assert_eq!(db.last_insert_row_id(), 1);
//!
//! for row in db.query("SELECT name FROM people WHERE id = :id", named_params! { "id" => 1 })? {
//!     assert_eq!(row?.get("name").and_then(Value::as_text), Some("alice"));
//! }
//! db.close(false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod marshal;
pub mod native;
pub mod params;
pub mod prelude;
pub mod results;
pub mod types;

pub use config::{OpenMode, OpenOptions, OpenOptionsBuilder};
pub use connection::Connection;
pub use constants::{ColumnType, Status};
pub use cursor::{Cursor, CursorState, Rows};
pub use error::{EmbedSqliteError, NativeError};
pub use native::{NativeExports, RusqliteEngine};
pub use params::Params;
pub use results::Row;
pub use types::{Param, Value};
