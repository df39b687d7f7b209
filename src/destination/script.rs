//! A destination that writes statements to a `sqlcmd`-style script instead of a live server.

use std::io::Write;

use super::{Destination, DestinationError};

/// Writes every statement followed by a `GO` batch separator.
///
/// Each `GO` batch runs in autocommit mode when the script is replayed, which gives the same
/// one-statement-per-commit shape as a live load. `commit` flushes the writer.
#[derive(Debug)]
pub struct ScriptDestination<W: Write> {
    writer: W,
    statements: usize,
}

impl<W: Write> ScriptDestination<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            statements: 0,
        }
    }

    /// Number of statements written so far.
    pub fn statements(&self) -> usize {
        self.statements
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Destination for ScriptDestination<W> {
    fn execute(&mut self, sql: &str) -> Result<(), DestinationError> {
        self.writer.write_all(sql.as_bytes())?;
        self.writer.write_all(b"\nGO\n")?;
        self.statements += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        self.writer.flush()?;
        Ok(())
    }
}
