//! Process-wide output sinks for trace text

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Append-only destination for flushed trace buffers
///
/// Each call receives the complete contents of one context's buffer and must
/// write it as a unit: chunks from concurrently flushing contexts may be
/// ordered arbitrarily but never interleaved.
pub trait OutputSink: Send + Sync {
    fn write_chunk(&self, chunk: &str) -> io::Result<()>;
}

/// Writes trace output to the process's standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(chunk.as_bytes())?;
        out.flush()
    }
}

/// Serializes chunks into any [`Write`] implementation
#[derive(Debug)]
pub struct WriterSink<W> {
    inner: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(chunk.as_bytes())?;
        writer.flush()
    }
}

impl<S: OutputSink + ?Sized> OutputSink for std::sync::Arc<S> {
    fn write_chunk(&self, chunk: &str) -> io::Result<()> {
        (**self).write_chunk(chunk)
    }
}
