//! Result codes, column type codes and open flags shared with the native module.
//!
//! Values mirror the C library so a WASM build of SQLite can be dropped in
//! behind [`NativeExports`](crate::native::NativeExports) unchanged.

/// Primary result codes returned by native calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    Internal = 2,
    Perm = 3,
    Abort = 4,
    Busy = 5,
    Locked = 6,
    NoMem = 7,
    ReadOnly = 8,
    Interrupt = 9,
    IoErr = 10,
    Corrupt = 11,
    NotFound = 12,
    Full = 13,
    CantOpen = 14,
    Protocol = 15,
    Empty = 16,
    Schema = 17,
    TooBig = 18,
    Constraint = 19,
    Mismatch = 20,
    Misuse = 21,
    NoLfs = 22,
    Auth = 23,
    Format = 24,
    Range = 25,
    NotADb = 26,
    Notice = 27,
    Warning = 28,
    Row = 100,
    Done = 101,
}

impl Status {
    /// Raw integer code as seen on the native side.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw code back to a `Status`. Extended codes are reduced to their
    /// primary code first.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code & 0xff {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Internal,
            3 => Self::Perm,
            4 => Self::Abort,
            5 => Self::Busy,
            6 => Self::Locked,
            7 => Self::NoMem,
            8 => Self::ReadOnly,
            9 => Self::Interrupt,
            10 => Self::IoErr,
            11 => Self::Corrupt,
            12 => Self::NotFound,
            13 => Self::Full,
            14 => Self::CantOpen,
            15 => Self::Protocol,
            16 => Self::Empty,
            17 => Self::Schema,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            22 => Self::NoLfs,
            23 => Self::Auth,
            24 => Self::Format,
            25 => Self::Range,
            26 => Self::NotADb,
            27 => Self::Notice,
            28 => Self::Warning,
            100 => Self::Row,
            101 => Self::Done,
            _ => return None,
        };
        Some(status)
    }

    /// Symbolic name, e.g. `SQLITE_CONSTRAINT`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "SQLITE_OK",
            Self::Error => "SQLITE_ERROR",
            Self::Internal => "SQLITE_INTERNAL",
            Self::Perm => "SQLITE_PERM",
            Self::Abort => "SQLITE_ABORT",
            Self::Busy => "SQLITE_BUSY",
            Self::Locked => "SQLITE_LOCKED",
            Self::NoMem => "SQLITE_NOMEM",
            Self::ReadOnly => "SQLITE_READONLY",
            Self::Interrupt => "SQLITE_INTERRUPT",
            Self::IoErr => "SQLITE_IOERR",
            Self::Corrupt => "SQLITE_CORRUPT",
            Self::NotFound => "SQLITE_NOTFOUND",
            Self::Full => "SQLITE_FULL",
            Self::CantOpen => "SQLITE_CANTOPEN",
            Self::Protocol => "SQLITE_PROTOCOL",
            Self::Empty => "SQLITE_EMPTY",
            Self::Schema => "SQLITE_SCHEMA",
            Self::TooBig => "SQLITE_TOOBIG",
            Self::Constraint => "SQLITE_CONSTRAINT",
            Self::Mismatch => "SQLITE_MISMATCH",
            Self::Misuse => "SQLITE_MISUSE",
            Self::NoLfs => "SQLITE_NOLFS",
            Self::Auth => "SQLITE_AUTH",
            Self::Format => "SQLITE_FORMAT",
            Self::Range => "SQLITE_RANGE",
            Self::NotADb => "SQLITE_NOTADB",
            Self::Notice => "SQLITE_NOTICE",
            Self::Warning => "SQLITE_WARNING",
            Self::Row => "SQLITE_ROW",
            Self::Done => "SQLITE_DONE",
        }
    }
}

/// Storage class of a column in the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ColumnType {
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
}

impl ColumnType {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Unknown codes read as `Null`.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Text,
            4 => Self::Blob,
            _ => Self::Null,
        }
    }
}

/// Flags accepted by the native `open` export.
pub mod open_flags {
    pub const READONLY: i32 = 0x0000_0001;
    pub const READWRITE: i32 = 0x0000_0002;
    pub const CREATE: i32 = 0x0000_0004;
    pub const URI: i32 = 0x0000_0040;
    pub const MEMORY: i32 = 0x0000_0080;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_codes_reduce_to_primary() {
        // SQLITE_CONSTRAINT_UNIQUE
        assert_eq!(Status::from_code(2067), Some(Status::Constraint));
        assert_eq!(Status::from_code(100), Some(Status::Row));
        assert_eq!(Status::from_code(-1), None);
    }

    #[test]
    fn column_type_defaults_to_null() {
        assert_eq!(ColumnType::from_code(3), ColumnType::Text);
        assert_eq!(ColumnType::from_code(42), ColumnType::Null);
    }
}
