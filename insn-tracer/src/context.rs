//! Per-context state cache
//!
//! Every execution context owns one [`ContextSlot`]. The slot stays
//! [`ContextSlot::Uninitialized`] until the context executes its first
//! instruction; at that point the catalog is resolved against the context's
//! own register facility and the slot becomes [`ContextSlot::Active`].

use serde::{Deserialize, Serialize};

use crate::catalog::{RegisterCatalog, ResolvedRegister};
use crate::engine::RegisterAccess;
use crate::error::TracerError;
use crate::report::ReportBuffer;
use crate::sink::OutputSink;
use crate::snapshot::{self, RegisterValue};
use crate::Result;

/// Tracing state of one active execution context
#[derive(Debug)]
pub struct ContextState {
    vcpu: usize,
    resolved: Vec<ResolvedRegister>,
    report: ReportBuffer,
    /// Reused across register reads
    scratch: Vec<u8>,
    instructions: u64,
}

impl ContextState {
    /// Resolve the catalog for `vcpu` and start with an empty report
    pub fn new(
        vcpu: usize,
        catalog: &RegisterCatalog,
        regs: &dyn RegisterAccess,
        threshold: u64,
    ) -> Self {
        let resolved = catalog.resolve_all(regs);
        tracing::debug!(
            "cpu={}: resolved {}/{} registers",
            vcpu,
            resolved.len(),
            catalog.len()
        );

        Self {
            vcpu,
            resolved,
            report: ReportBuffer::new(threshold),
            scratch: Vec::with_capacity(8),
            instructions: 0,
        }
    }

    pub fn vcpu(&self) -> usize {
        self.vcpu
    }

    /// Registers this context traces, in catalog order
    pub fn resolved(&self) -> &[ResolvedRegister] {
        &self.resolved
    }

    pub fn report(&self) -> &ReportBuffer {
        &self.report
    }

    /// Instructions recorded since the context was initialized
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Record the current register values for one executed instruction
    ///
    /// Flushes to `sink` when the threshold is reached. On an unsupported
    /// register width nothing of this record is kept.
    pub fn record_instruction(
        &mut self,
        regs: &dyn RegisterAccess,
        sink: &dyn OutputSink,
    ) -> Result<()> {
        let Self {
            vcpu,
            resolved,
            report,
            scratch,
            ..
        } = self;
        let vcpu = *vcpu;

        let full = report.record(|out| {
            for reg in resolved.iter() {
                scratch.clear();
                regs.read_register(reg.handle, scratch);
                let value = RegisterValue::decode(scratch)
                    .ok_or_else(|| TracerError::unsupported_width(vcpu, &reg.name, scratch))?;
                snapshot::write_line(out, vcpu, &reg.name, value);
            }
            Ok::<(), TracerError>(())
        })?;
        self.instructions += 1;

        if full {
            let written = self.flush(sink)?;
            tracing::trace!("cpu={}: flushed {} bytes", vcpu, written);
        }
        Ok(())
    }

    /// Write out whatever is buffered, regardless of the threshold
    pub fn flush(&mut self, sink: &dyn OutputSink) -> Result<usize> {
        let vcpu = self.vcpu;
        self.report
            .flush(sink)
            .map_err(|source| TracerError::Sink { vcpu, source })
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            vcpu: self.vcpu,
            registers: self.resolved.len(),
            instructions: self.instructions,
            flushes: self.report.flushes(),
            bytes_written: self.report.bytes_written(),
        }
    }
}

/// Totals for one context, reported at finalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub vcpu: usize,
    /// Number of catalog registers this context resolved
    pub registers: usize,
    pub instructions: u64,
    pub flushes: u64,
    pub bytes_written: u64,
}

/// Lazily initialized state of one execution context
#[derive(Debug, Default)]
pub enum ContextSlot {
    #[default]
    Uninitialized,
    Active(ContextState),
}

impl ContextSlot {
    /// Return the context's state, initializing it on first use
    ///
    /// Once active, the slot is returned as is: the resolved registers,
    /// buffered text and pending count are left untouched.
    pub fn get_or_init(
        &mut self,
        vcpu: usize,
        catalog: &RegisterCatalog,
        regs: &dyn RegisterAccess,
        threshold: u64,
    ) -> &mut ContextState {
        if matches!(self, ContextSlot::Uninitialized) {
            *self = ContextSlot::Active(ContextState::new(vcpu, catalog, regs, threshold));
        }
        match self {
            ContextSlot::Active(state) => state,
            ContextSlot::Uninitialized => unreachable!("slot initialized above"),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ContextSlot::Active(_))
    }

    /// Take the state out, leaving the slot uninitialized
    pub fn take(&mut self) -> Option<ContextState> {
        match std::mem::take(self) {
            ContextSlot::Active(state) => Some(state),
            ContextSlot::Uninitialized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RegisterHandle;
    use std::cell::Cell;
    use std::io;
    use std::sync::Mutex;

    /// rax is 4 bytes, rbx is 8 bytes, "bad" is 2 bytes; rip does not exist
    struct Regs {
        step: Cell<u64>,
        lookups: Cell<usize>,
    }

    impl Regs {
        fn new() -> Self {
            Self {
                step: Cell::new(0),
                lookups: Cell::new(0),
            }
        }
    }

    impl RegisterAccess for Regs {
        fn find_register(&self, name: &str) -> Option<RegisterHandle> {
            self.lookups.set(self.lookups.get() + 1);
            match name {
                "rax" => Some(RegisterHandle(0)),
                "rbx" => Some(RegisterHandle(1)),
                "bad" => Some(RegisterHandle(2)),
                _ => None,
            }
        }

        fn read_register(&self, handle: RegisterHandle, buf: &mut Vec<u8>) {
            let step = self.step.get();
            match handle.0 {
                0 => buf.extend_from_slice(&(step as u32).to_le_bytes()),
                1 => buf.extend_from_slice(&(step * 2).to_le_bytes()),
                _ => buf.extend_from_slice(&[0xaa, 0xbb]),
            }
        }
    }

    #[derive(Default)]
    struct Chunks(Mutex<Vec<String>>);

    impl OutputSink for Chunks {
        fn write_chunk(&self, chunk: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(chunk.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_get_or_init_is_idempotent() {
        let catalog = RegisterCatalog::new(["rax", "rip", "rbx"]);
        let regs = Regs::new();
        let sink = Chunks::default();
        let mut slot = ContextSlot::default();

        let state = slot.get_or_init(0, &catalog, &regs, 10);
        state.record_instruction(&regs, &sink).unwrap();
        let first: Vec<ResolvedRegister> = state.resolved().to_vec();
        let text = state.report().text().to_string();

        let state = slot.get_or_init(0, &catalog, &regs, 10);
        assert_eq!(state.resolved(), first.as_slice());
        assert_eq!(state.report().pending(), 1);
        assert_eq!(state.report().text(), text);
        // Resolution ran once per catalog entry, not again on re-entry
        assert_eq!(regs.lookups.get(), 3);
    }

    #[test]
    fn test_record_instruction_formats_in_catalog_order() {
        let catalog = RegisterCatalog::new(["rbx", "rip", "rax"]);
        let regs = Regs::new();
        regs.step.set(5);
        let sink = Chunks::default();
        let mut state = ContextState::new(2, &catalog, &regs, 10);

        state.record_instruction(&regs, &sink).unwrap();
        assert_eq!(
            state.report().text(),
            "cpu=2, rbx=000000000000000a, size=8\ncpu=2, rax=00000005, size=4\n"
        );
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_threshold_flush_between_records() {
        let catalog = RegisterCatalog::new(["rax"]);
        let regs = Regs::new();
        let sink = Chunks::default();
        let mut state = ContextState::new(0, &catalog, &regs, 2);

        for step in 1..=3 {
            regs.step.set(step);
            state.record_instruction(&regs, &sink).unwrap();
        }

        assert_eq!(
            *sink.0.lock().unwrap(),
            ["cpu=0, rax=00000001, size=4\ncpu=0, rax=00000002, size=4\n"]
        );
        assert_eq!(state.report().text(), "cpu=0, rax=00000003, size=4\n");
        assert_eq!(state.report().pending(), 1);
        assert_eq!(state.instructions(), 3);
    }

    #[test]
    fn test_unsupported_width_discards_record() {
        let catalog = RegisterCatalog::new(["rax", "bad"]);
        let regs = Regs::new();
        let sink = Chunks::default();
        let mut state = ContextState::new(4, &catalog, &regs, 10);

        let err = state.record_instruction(&regs, &sink).unwrap_err();
        match err {
            TracerError::UnsupportedWidth {
                vcpu, register, size, ..
            } => {
                assert_eq!(vcpu, 4);
                assert_eq!(register, "bad");
                assert_eq!(size, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(state.report().text().is_empty());
        assert_eq!(state.report().pending(), 0);
        assert_eq!(state.instructions(), 0);
    }

    #[test]
    fn test_take_leaves_slot_uninitialized() {
        let catalog = RegisterCatalog::new(["rax"]);
        let regs = Regs::new();
        let mut slot = ContextSlot::default();
        assert!(slot.take().is_none());

        slot.get_or_init(1, &catalog, &regs, 1);
        assert!(slot.is_active());
        let state = slot.take().unwrap();
        assert_eq!(state.vcpu(), 1);
        assert!(!slot.is_active());
    }
}
