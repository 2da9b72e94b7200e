//! Line ingestion sources.
//!
//! A source produces raw newline-delimited records from an external byte
//! stream (named pipe, file, stdin). Sources are blocking and sequential.
//!
//! The ingestion layer is responsible for:
//! - Splitting the byte stream into lines
//! - Reporting end-of-stream as `Ok(None)`
//!
//! The ingestion layer MUST NOT:
//! - Interpret line content (that is the record decoder's job)
//! - Retry a closed stream

pub mod lines;

pub use lines::{open_input, BufReadSource};

use anyhow::Result;

/// One undecoded input record, without its line terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine(Vec<u8>);

impl RawLine {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Blocking producer of raw lines.
pub trait LineSource {
    /// Read the next line. `Ok(None)` means the stream has ended.
    fn next_line(&mut self) -> Result<Option<RawLine>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn next_line(&mut self) -> Result<Option<RawLine>> {
        (**self).next_line()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
