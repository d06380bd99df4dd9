//! On-disk run format.
//!
//! A run file holds its lines joined by a single `\n` with no separator after the last
//! line. The format alone cannot tell an empty file from a file holding one empty line, so
//! every reader is opened with the line count its writer reported.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::{Line, SortError};

/// Line separator used by input, run and output files.
pub const SEPARATOR: u8 = b'\n';

/// Sequential writer of one run (or of the final output).
pub struct RunWriter {
    path: PathBuf,
    writer: io::BufWriter<fs::File>,
    lines: u64,
}

impl RunWriter {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path, buf_size: Option<usize>) -> Result<Self, SortError> {
        let file = fs::File::create(path).map_err(|err| SortError::write(path, err))?;
        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        Ok(RunWriter {
            path: path.to_path_buf(),
            writer,
            lines: 0,
        })
    }

    /// Appends a line, preceded by a separator unless it is the first one.
    pub fn write_line(&mut self, line: &[u8]) -> Result<(), SortError> {
        if self.lines > 0 {
            self.writer
                .write_all(&[SEPARATOR])
                .map_err(|err| SortError::write(&self.path, err))?;
        }
        self.writer
            .write_all(line)
            .map_err(|err| SortError::write(&self.path, err))?;
        self.lines += 1;

        Ok(())
    }

    /// Number of lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the file, returning the number of lines it holds.
    pub fn finish(mut self) -> Result<u64, SortError> {
        self.writer.flush().map_err(|err| SortError::write(&self.path, err))?;
        Ok(self.lines)
    }
}

/// Sequential reader of one run.
///
/// Yields exactly `lines` lines and then `None`.
pub struct RunReader {
    path: PathBuf,
    lines: io::Split<io::BufReader<fs::File>>,
    remaining: u64,
    last_was_empty: bool,
}

impl RunReader {
    pub fn open(path: &Path, lines: u64, buf_size: Option<usize>) -> Result<Self, SortError> {
        let file = fs::File::open(path).map_err(|err| SortError::read(path, err))?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        Ok(RunReader {
            path: path.to_path_buf(),
            lines: reader.split(SEPARATOR),
            remaining: lines,
            last_was_empty: true,
        })
    }

    /// Number of lines not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn truncated(&self) -> SortError {
        SortError::read(
            &self.path,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("run truncated, {} line(s) missing", self.remaining),
            ),
        )
    }
}

impl Iterator for RunReader {
    type Item = Result<Line, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let line = match self.lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => return Some(Err(SortError::read(&self.path, err))),
            // a trailing empty line leaves no bytes behind its separator
            None if self.remaining == 1 && self.last_was_empty => Vec::new(),
            None => return Some(Err(self.truncated())),
        };

        self.remaining -= 1;
        self.last_was_empty = line.is_empty();

        Some(Ok(line))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}
