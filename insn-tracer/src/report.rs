//! Buffered per-context report and flushing
//!
//! A [`ReportBuffer`] accumulates the formatted lines of whole instruction
//! records and hands them to the output sink in one write once `threshold`
//! records are pending. Flushes only ever happen between records.

use std::io;

use crate::sink::OutputSink;

/// Text accumulator with an instruction-count flush threshold
#[derive(Debug)]
pub struct ReportBuffer {
    text: String,
    pending: u64,
    threshold: u64,
    flushes: u64,
    bytes_written: u64,
}

impl ReportBuffer {
    /// Create an empty buffer flushing every `threshold` records
    ///
    /// `threshold` must be at least 1; [`crate::TracerConfig`] validates it.
    pub fn new(threshold: u64) -> Self {
        debug_assert!(threshold >= 1);
        Self {
            text: String::new(),
            pending: 0,
            threshold,
            flushes: 0,
            bytes_written: 0,
        }
    }

    /// Append one complete instruction record
    ///
    /// `write` appends the record's lines. If it fails, everything it appended
    /// is discarded so the buffer never holds a partial record. Returns
    /// `Ok(true)` when the threshold has been reached and the buffer must be
    /// flushed.
    pub fn record<E>(
        &mut self,
        write: impl FnOnce(&mut String) -> Result<(), E>,
    ) -> Result<bool, E> {
        let mark = self.text.len();
        if let Err(err) = write(&mut self.text) {
            self.text.truncate(mark);
            return Err(err);
        }
        self.pending += 1;
        Ok(self.pending >= self.threshold)
    }

    /// Write the buffered text to `sink` as a single chunk and reset
    ///
    /// An empty buffer produces no sink call. Capacity is kept for reuse.
    /// Returns the number of bytes written.
    pub fn flush(&mut self, sink: &dyn OutputSink) -> io::Result<usize> {
        self.pending = 0;
        if self.text.is_empty() {
            return Ok(0);
        }

        sink.write_chunk(&self.text)?;
        let written = self.text.len();
        self.text.clear();
        self.flushes += 1;
        self.bytes_written += written as u64;
        Ok(written)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Records appended since the last flush
    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Number of non-empty writes made to the sink
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
