//! `BufRead`-backed line source for stdin, regular files and named pipes.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::{LineSource, RawLine};

/// Path that selects stdin instead of a file.
pub const STDIN_PATH: &str = "-";

pub struct BufReadSource<R> {
    reader: R,
    name: String,
    lines_read: u64,
}

impl<R: BufRead> BufReadSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            lines_read: 0,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn next_line(&mut self) -> Result<Option<RawLine>> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed to read {}", self.name))?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        self.lines_read += 1;
        Ok(Some(RawLine::new(buf)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Open the configured input. `-` reads stdin; any other path is opened
/// read-only, which blocks on a FIFO until a writer connects.
pub fn open_input(path: &Path) -> Result<Box<dyn LineSource + Send>> {
    if path.as_os_str() == STDIN_PATH {
        log::info!("Reading records from stdin");
        let reader = BufReader::new(io::stdin());
        return Ok(Box::new(BufReadSource::new(reader, "stdin")));
    }

    log::info!("Opening input {}", path.display());
    let file =
        File::open(path).with_context(|| format!("failed to open input {}", path.display()))?;
    log::info!("Input {} opened", path.display());
    Ok(Box::new(BufReadSource::new(
        BufReader::new(file),
        path.display().to_string(),
    )))
}
