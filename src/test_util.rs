//! In-memory stream used by unit tests.

use std::collections::VecDeque;
use std::vec::Vec;

use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

/// Scripted byte stream: reads drain `input`, writes append to `output`.
pub struct MockStream {
    pub input: VecDeque<u8>,
    /// Largest number of bytes a single read returns.
    pub read_chunk: usize,
    /// Never complete a read once `input` is empty, instead of reporting EOF.
    pub stall_when_empty: bool,
    pub output: Vec<u8>,
    /// Largest number of bytes a single write accepts.
    pub write_chunk: usize,
    /// Total bytes accepted before writes start returning zero.
    pub write_limit: Option<usize>,
    /// Fail every read and write.
    pub fail_io: bool,
    pub reads: usize,
    pub writes: usize,
    pub flushes: usize,
}

impl MockStream {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            read_chunk: usize::MAX,
            stall_when_empty: false,
            output: Vec::new(),
            write_chunk: usize::MAX,
            write_limit: None,
            fail_io: false,
            reads: 0,
            writes: 0,
            flushes: 0,
        }
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }
}

impl ErrorType for MockStream {
    type Error = ErrorKind;
}

impl Read for MockStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fail_io {
            return Err(ErrorKind::ConnectionReset);
        }
        if self.input.is_empty() && self.stall_when_empty {
            return core::future::pending().await;
        }
        self.reads += 1;
        let n = buf.len().min(self.read_chunk).min(self.input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.input.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MockStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_io {
            return Err(ErrorKind::BrokenPipe);
        }
        self.writes += 1;
        let room = match self.write_limit {
            Some(limit) => limit.saturating_sub(self.output.len()),
            None => usize::MAX,
        };
        let n = buf.len().min(self.write_chunk).min(room);
        self.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}
