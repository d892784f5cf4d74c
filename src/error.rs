//! Error taxonomy shared across the indexer, the view engine and the store.
use std::path::PathBuf;
use thiserror::Error;

/// A content file that could not be turned into an index record.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed header on line {line}: {text:?}")]
    MalformedHeader { line: usize, text: String },
    #[error("invalid date {0:?}")]
    InvalidDate(String),
    #[error("invalid status {0:?}")]
    InvalidStatus(String),
    #[error("invalid entry id {0:?}")]
    InvalidId(String),
}

/// A view specification rejected at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidViewSpec {
    #[error("unknown view option {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for view option {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("limit must be a positive integer")]
    NonPositiveLimit,
}

impl InvalidViewSpec {
    pub fn value(key: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidValue {
            key,
            value: value.into(),
            reason,
        }
    }
}

/// Failure reported by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row {id}: {message}")]
    Corrupt { id: i64, message: String },
}

/// Failure of a whole scan pass. Per-file problems never surface here.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("content root {} is not readable: {source}", path.display())]
    ContentRoot {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("parse task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure while materializing a view.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{key} refers to unknown entry {id}")]
    UnknownCursor { key: &'static str, id: i64 },
}
