/// Result set streams
///
/// Pull-based readers over an open [`ResultSet`]: rows keyed by column name, rows
/// as positional value lists, and the bytes of one LOB column read in chunks.
use std::io::{self, Read};

use crate::constants::{LOB_DEFAULT_READ_SIZE, LOB_MAX_READ_SIZE};
use crate::cursor::ResultSet;
use crate::error::{Error, Result};
use crate::models::{HostValue, Row};

/// Rows of a result set keyed by column name. Ends after the last row or the first error.
pub struct RowStream<'a> {
    rs: &'a ResultSet,
    done: bool,
}

impl<'a> RowStream<'a> {
    pub fn new(rs: &'a ResultSet) -> Self {
        RowStream { rs, done: false }
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.rs.next() {
            Ok(true) => self.rs.get_values(),
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        self.done = item.is_err();
        Some(item)
    }
}

/// Rows of a result set as values in column order.
pub struct ArrayStream<'a> {
    rs: &'a ResultSet,
    columns: usize,
    done: bool,
}

impl<'a> ArrayStream<'a> {
    pub fn new(rs: &'a ResultSet) -> Result<Self> {
        let columns = rs.get_column_count()?;
        Ok(ArrayStream {
            rs,
            columns,
            done: false,
        })
    }

    fn current(&self) -> Result<Vec<HostValue>> {
        (0..self.columns).map(|col| self.rs.get_value(col)).collect()
    }
}

impl Iterator for ArrayStream<'_> {
    type Item = Result<Vec<HostValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.rs.next() {
            Ok(true) => self.current(),
            Ok(false) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        self.done = item.is_err();
        Some(item)
    }
}

/// Reads one LOB column of the current row.
///
/// Each `read` asks the result set for at most `read_size` bytes, capped at
/// [`LOB_MAX_READ_SIZE`]. The value ends at the first empty chunk.
pub struct LobReader<'a> {
    rs: &'a ResultSet,
    col: usize,
    offset: usize,
    read_size: usize,
}

impl<'a> LobReader<'a> {
    pub fn new(rs: &'a ResultSet, col: usize, read_size: Option<usize>) -> Result<Self> {
        let columns = rs.get_column_info()?;
        let Some(info) = columns.get(col) else {
            return Err(Error::InvalidParameter {
                index: 1,
                function: "LobReader::new(rs, col, read_size)",
                expected: "column index",
                received: "out of range index",
            });
        };
        if !info.native_type.is_lob() {
            return Err(Error::General(format!(
                "Column {col} is not LOB type ({})",
                info.native_type.name()
            )));
        }
        let read_size = read_size
            .filter(|n| *n > 0)
            .unwrap_or(LOB_DEFAULT_READ_SIZE)
            .min(LOB_MAX_READ_SIZE);
        Ok(LobReader {
            rs,
            col,
            offset: 0,
            read_size,
        })
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> usize {
        self.offset
    }
}

impl Read for LobReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = buf.len().min(self.read_size);
        if want == 0 {
            return Ok(0);
        }
        let chunk = self
            .rs
            .get_data(self.col, self.offset, want)
            .map_err(io::Error::other)?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        self.offset += chunk.len();
        Ok(chunk.len())
    }
}
