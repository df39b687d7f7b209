//! The destination seam.
//!
//! The loader never opens connections itself. Callers hand it something implementing
//! [`Destination`] (a live connection wrapper, a script writer, or a test double), and the loader
//! drives it with one statement per batch followed by a commit.

pub mod script;

use std::fmt;

use thiserror::Error;

pub use script::ScriptDestination;

/// Coarse failure class reported by a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, busy servers, deadlock victims: likely to pass on a smaller retry.
    Transient,
    /// The statement or payload was too large.
    SizeLimit,
    /// Anything else (bad data, constraint violations, ...).
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::SizeLimit => "size-limit",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`Destination`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} destination failure: {message}")]
pub struct DestinationError {
    pub kind: FailureKind,
    pub message: String,
}

impl DestinationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from driver text only, classifying it by [`classify_message`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_message(&message),
            message,
        }
    }

    /// Effective class: the reported kind, refined by the message when the driver only said
    /// [`FailureKind::Other`].
    pub fn effective_kind(&self) -> FailureKind {
        match self.kind {
            FailureKind::Other => classify_message(&self.message),
            k => k,
        }
    }

    /// Whether the executor should shrink harder than usual before retrying.
    pub fn is_transient(&self) -> bool {
        self.effective_kind() != FailureKind::Other
    }
}

impl From<std::io::Error> for DestinationError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FailureKind::Transient,
            _ => FailureKind::Other,
        };
        Self::new(kind, e.to_string())
    }
}

const SIZE_SIGNATURES: &[&str] = &[
    "request size",
    "payload too large",
    "packet size",
    "too large",
    "exceeds the maximum",
    "out of memory",
];

const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "server busy",
    "server is busy",
    "deadlock",
    "connection reset",
    "try again",
];

/// Best-effort classification of driver error text.
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_ascii_lowercase();
    if SIZE_SIGNATURES.iter().any(|s| lower.contains(s)) {
        FailureKind::SizeLimit
    } else if TRANSIENT_SIGNATURES.iter().any(|s| lower.contains(s)) {
        FailureKind::Transient
    } else {
        FailureKind::Other
    }
}

/// A relational store that accepts statement text.
///
/// Implementations must make each `execute` + `commit` pair durable before returning from
/// `commit`; the loader only advances past a batch once `commit` succeeded.
pub trait Destination {
    /// Run one statement.
    fn execute(&mut self, sql: &str) -> Result<(), DestinationError>;

    /// Make everything executed since the last commit durable.
    fn commit(&mut self) -> Result<(), DestinationError>;

    /// Discard anything executed since the last commit. Called after a failed attempt.
    fn rollback(&mut self) -> Result<(), DestinationError> {
        Ok(())
    }

    /// Whether `table` already exists, if the destination can tell.
    fn table_exists(&mut self, _table: &str) -> Result<Option<bool>, DestinationError> {
        Ok(None)
    }
}

impl<D: Destination + ?Sized> Destination for &mut D {
    fn execute(&mut self, sql: &str) -> Result<(), DestinationError> {
        (**self).execute(sql)
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        (**self).rollback()
    }

    fn table_exists(&mut self, table: &str) -> Result<Option<bool>, DestinationError> {
        (**self).table_exists(table)
    }
}

impl<D: Destination + ?Sized> Destination for Box<D> {
    fn execute(&mut self, sql: &str) -> Result<(), DestinationError> {
        (**self).execute(sql)
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        (**self).rollback()
    }

    fn table_exists(&mut self, table: &str) -> Result<Option<bool>, DestinationError> {
        (**self).table_exists(table)
    }
}
