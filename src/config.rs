use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::constants::open_flags;
use crate::error::EmbedSqliteError;

/// Path that opens a private, non-persistent database.
pub const MEMORY_PATH: &str = ":memory:";

/// How the database file may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Read-only; the file must exist.
    Read,
    /// Read-write; the file must exist.
    Write,
    /// Read-write, creating the file when missing.
    #[default]
    Create,
}

/// Options for opening a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    pub path: String,
    pub mode: OpenMode,
    /// Open an in-memory database regardless of `path`.
    pub memory: bool,
    /// Interpret `path` as a `file:` URI.
    pub uri: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new(MEMORY_PATH)
    }
}

impl OpenOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::default(),
            memory: false,
            uri: false,
        }
    }

    #[must_use]
    pub fn builder(path: impl Into<String>) -> OpenOptionsBuilder {
        OpenOptionsBuilder::new(path)
    }

    /// The filename handed to native `open`.
    ///
    /// # Errors
    /// Returns [`EmbedSqliteError::ConfigError`] when no path is set and
    /// `memory` is off.
    pub fn target(&self) -> Result<&str, EmbedSqliteError> {
        if self.memory {
            return Ok(MEMORY_PATH);
        }
        if self.path.is_empty() {
            return Err(EmbedSqliteError::ConfigError(
                "database path must not be empty".to_string(),
            ));
        }
        Ok(&self.path)
    }

    /// Native open flags for these options.
    #[must_use]
    pub fn flags(&self) -> i32 {
        let mut flags = match self.mode {
            OpenMode::Read => open_flags::READONLY,
            OpenMode::Write => open_flags::READWRITE,
            OpenMode::Create => open_flags::READWRITE | open_flags::CREATE,
        };
        if self.uri {
            flags |= open_flags::URI;
        }
        if self.memory {
            flags |= open_flags::MEMORY;
        }
        flags
    }
}

/// Fluent builder for [`OpenOptions`].
#[derive(Debug, Clone)]
pub struct OpenOptionsBuilder {
    opts: OpenOptions,
}

impl OpenOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: OpenOptions::new(path),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn memory(mut self, memory: bool) -> Self {
        self.opts.memory = memory;
        self
    }

    #[must_use]
    pub fn uri(mut self, uri: bool) -> Self {
        self.opts.uri = uri;
        self
    }

    #[must_use]
    pub fn finish(self) -> OpenOptions {
        self.opts
    }

    /// Open a [`Connection`] on the default native engine.
    ///
    /// # Errors
    /// Returns `EmbedSqliteError` if the options are invalid or native `open` fails.
    pub fn open(self) -> Result<Connection, EmbedSqliteError> {
        Connection::open_with(&self.finish())
    }
}
