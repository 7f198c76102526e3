// src/monitor/tail.rs

//! Cursor-based reader for a growing log file.
//!
//! Each call to [`LogCursor::read_new_lines`] reads only the bytes appended
//! since the previous call, so the cost of a poll does not grow with the log.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Remembers how far into one log file we have read.
#[derive(Debug)]
pub struct LogCursor {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline; completed on a later read.
    partial: Vec<u8>,
}

impl LogCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Return complete lines appended since the last call.
    ///
    /// A missing file is not an error: the engine may not have created it yet.
    /// If the file shrank (rewritten by the engine), reading restarts at 0.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;

        let mut data = std::mem::take(&mut self.partial);
        data.extend_from_slice(&buf);

        let mut lines = Vec::new();
        let mut start = 0;
        for (idx, byte) in data.iter().enumerate() {
            if *byte == b'\n' {
                let line = &data[start..idx];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                lines.push(String::from_utf8_lossy(line).into_owned());
                start = idx + 1;
            }
        }
        self.partial = data[start..].to_vec();

        Ok(lines)
    }

    /// Return whatever is buffered after the last newline, consuming it.
    ///
    /// Used for a final read after the engine has exited, when the last line
    /// may lack a terminator.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}
