//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and macros
//! to make it easier to get started with the library.

pub use crate::config::{OpenMode, OpenOptions};
pub use crate::connection::Connection;
pub use crate::cursor::{Cursor, CursorState, Rows};
pub use crate::error::{EmbedSqliteError, NativeError};
pub use crate::params::Params;
pub use crate::results::Row;
pub use crate::types::{Param, Value};
pub use crate::{named_params, params};
