use std::fmt;

use thiserror::Error;

use crate::constants::Status;
use crate::marshal;
use crate::native::NativeExports;

/// Message and status code describing one failure at the native boundary.
///
/// `code` is `None` when the failure was detected on the host side before any
/// native call could report a status (e.g. an unknown parameter name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub message: String,
    pub code: Option<i32>,
}

impl NativeError {
    #[must_use]
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// A failure without a native status code.
    #[must_use]
    pub fn host(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Capture `code` together with the engine's last error text.
    #[must_use]
    pub fn from_exports(exports: &dyn NativeExports, code: i32) -> Self {
        let ptr = exports.get_sqlite_error_str();
        let message = marshal::read_string(exports, ptr);
        Self::new(message, code)
    }

    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.code.and_then(Status::from_code)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Error)]
pub enum EmbedSqliteError {
    #[error("failed to open database: {0}")]
    Open(NativeError),

    #[error("failed to prepare statement: {0}")]
    Prepare(NativeError),

    #[error("failed to bind parameter: {0}")]
    Bind(NativeError),

    #[error("failed to step statement: {0}")]
    Step(NativeError),

    #[error("failed to close database: {0}")]
    Close(NativeError),

    #[error("{0}")]
    UseAfterClose(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl EmbedSqliteError {
    /// Native status code, when the failure came from the native module.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.native().and_then(|err| err.code)
    }

    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.native().and_then(NativeError::status)
    }

    #[must_use]
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::Open(err)
            | Self::Prepare(err)
            | Self::Bind(err)
            | Self::Step(err)
            | Self::Close(err) => Some(err),
            Self::UseAfterClose(_) | Self::ConfigError(_) => None,
        }
    }

    pub(crate) fn database_closed() -> Self {
        Self::UseAfterClose("Database was closed".to_string())
    }

    pub(crate) fn cursor_closed() -> Self {
        Self::UseAfterClose("Cursor was closed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_when_present() {
        let err = EmbedSqliteError::Step(NativeError::new("UNIQUE constraint failed: t.id", 19));
        assert_eq!(
            err.to_string(),
            "failed to step statement: UNIQUE constraint failed: t.id (code 19)"
        );
        assert_eq!(err.status(), Some(Status::Constraint));

        let err = EmbedSqliteError::Bind(NativeError::host("No parameter named ':x'"));
        assert_eq!(err.to_string(), "failed to bind parameter: No parameter named ':x'");
        assert_eq!(err.code(), None);
    }
}
