//! Tracer lifecycle
//!
//! [`Tracer`] owns the fixed-length array of per-context slots and moves
//! through `Installed -> Tracing -> Draining -> Finalized`. It is shared with
//! the engine's callbacks through an `Arc`, so no global state is needed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::catalog::RegisterCatalog;
use crate::config::TracerConfig;
use crate::context::{ContextSlot, ContextSummary};
use crate::engine::{Engine, InsnExecCallback, RegisterAccess, TranslationBlock};
use crate::error::TracerError;
use crate::sink::OutputSink;
use crate::Result;

/// Lifecycle phase of a [`Tracer`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Callbacks registered, no instruction executed yet
    Installed = 0,
    /// At least one instruction has been recorded
    Tracing = 1,
    /// Exit hook running; new instruction events are ignored
    Draining = 2,
    /// Every context flushed and released
    Finalized = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Installed,
            1 => Phase::Tracing,
            2 => Phase::Draining,
            _ => Phase::Finalized,
        }
    }
}

/// Per-context totals gathered when the tracer is finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub max_vcpus: usize,
    pub flush_threshold: u64,
    /// Contexts that executed at least one instruction, by index
    pub contexts: Vec<ContextSummary>,
}

impl FinalizeReport {
    pub fn total_instructions(&self) -> u64 {
        self.contexts.iter().map(|c| c.instructions).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Per-instruction register tracer
pub struct Tracer {
    catalog: RegisterCatalog,
    threshold: u64,
    slots: Box<[Mutex<ContextSlot>]>,
    sink: Box<dyn OutputSink>,
    phase: AtomicU8,
}

impl Tracer {
    /// Create a tracer for `max_vcpus` contexts without registering any hooks
    pub fn new(
        config: &TracerConfig,
        max_vcpus: usize,
        sink: impl OutputSink + 'static,
    ) -> Result<Self> {
        config.validate()?;
        if max_vcpus == 0 {
            return Err(TracerError::NoContexts);
        }

        let slots = (0..max_vcpus)
            .map(|_| Mutex::new(ContextSlot::Uninitialized))
            .collect();

        Ok(Self {
            catalog: config.catalog(),
            threshold: config.flush_threshold,
            slots,
            sink: Box::new(sink),
            phase: AtomicU8::new(Phase::Installed as u8),
        })
    }

    /// Create a tracer sized to the engine and register its callbacks
    ///
    /// Every translated block gets the instruction callback on each of its
    /// instructions; the exit hook flushes and releases all contexts.
    pub fn install<E>(
        engine: &mut E,
        config: TracerConfig,
        sink: impl OutputSink + 'static,
    ) -> Result<Arc<Self>>
    where
        E: Engine + ?Sized,
    {
        let max_vcpus = engine.max_vcpus();
        let tracer = Arc::new(Self::new(&config, max_vcpus, sink)?);

        let exec = tracer.insn_exec_callback();
        engine.register_block_translated(Box::new(move |block: &mut dyn TranslationBlock| {
            instrument_block(block, &exec)
        }));

        let at_exit = Arc::clone(&tracer);
        engine.register_exit(Box::new(move || at_exit.on_exit()));

        tracing::info!(
            "insn tracer installed: {} contexts, {} registers, flush every {} instructions",
            max_vcpus,
            tracer.catalog.len(),
            tracer.threshold
        );
        Ok(tracer)
    }

    /// Callback attached to every instruction; fatal errors terminate the process
    fn insn_exec_callback(self: &Arc<Self>) -> InsnExecCallback {
        let tracer = Arc::clone(self);
        Arc::new(move |vcpu: usize, regs: &dyn RegisterAccess| {
            if let Err(err) = tracer.on_insn_exec(vcpu, regs) {
                fatal(&err);
            }
        })
    }

    /// Record one instruction execution on `vcpu`
    pub fn on_insn_exec(&self, vcpu: usize, regs: &dyn RegisterAccess) -> Result<()> {
        let slot = self.slots.get(vcpu).ok_or(TracerError::ContextOutOfRange {
            vcpu,
            max: self.slots.len(),
        })?;
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        // Checked under the slot lock: finalize publishes Draining before
        // taking any slot, so a drained slot is never re-initialized.
        match self.phase() {
            Phase::Installed => {
                if self
                    .phase
                    .compare_exchange(
                        Phase::Installed as u8,
                        Phase::Tracing as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    tracing::debug!("first instruction on cpu={}, tracing started", vcpu);
                }
            }
            Phase::Tracing => {}
            Phase::Draining | Phase::Finalized => return Ok(()),
        }

        slot.get_or_init(vcpu, &self.catalog, regs, self.threshold)
            .record_instruction(regs, self.sink.as_ref())
    }

    /// Flush and release every context
    ///
    /// Runs once; later calls return `Ok(None)`. Contexts that never executed
    /// an instruction are skipped, and contexts with nothing buffered produce
    /// no write.
    pub fn finalize(&self) -> Result<Option<FinalizeReport>> {
        let started = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (Phase::from_u8(raw) < Phase::Draining).then_some(Phase::Draining as u8)
            })
            .is_ok();
        if !started {
            return Ok(None);
        }

        let mut contexts = Vec::new();
        for slot in self.slots.iter() {
            let state = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            let Some(mut state) = state else {
                continue;
            };
            state.flush(self.sink.as_ref())?;
            contexts.push(state.summary());
        }

        self.phase.store(Phase::Finalized as u8, Ordering::Release);
        Ok(Some(FinalizeReport {
            max_vcpus: self.slots.len(),
            flush_threshold: self.threshold,
            contexts,
        }))
    }

    /// Exit hook body: finalize and log the report
    pub fn on_exit(&self) {
        match self.finalize() {
            Ok(Some(report)) => match report.to_json() {
                Ok(json) => tracing::info!(
                    "insn tracer finalized: {} instructions traced, report={}",
                    report.total_instructions(),
                    json
                ),
                Err(e) => tracing::warn!("failed to serialize finalize report: {}", e),
            },
            Ok(None) => tracing::debug!("insn tracer already finalized"),
            Err(err) => fatal(&err),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn max_vcpus(&self) -> usize {
        self.slots.len()
    }

    pub fn flush_threshold(&self) -> u64 {
        self.threshold
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    /// Totals of one context, or `None` if it has not executed anything
    pub fn context_summary(&self, vcpu: usize) -> Option<ContextSummary> {
        let slot = self.slots.get(vcpu)?.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            ContextSlot::Active(state) => Some(state.summary()),
            ContextSlot::Uninitialized => None,
        }
    }

    /// Instructions buffered on `vcpu` since its last flush
    pub fn pending(&self, vcpu: usize) -> u64 {
        let Some(slot) = self.slots.get(vcpu) else {
            return 0;
        };
        match &*slot.lock().unwrap_or_else(PoisonError::into_inner) {
            ContextSlot::Active(state) => state.report().pending(),
            ContextSlot::Uninitialized => 0,
        }
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("catalog", &self.catalog)
            .field("threshold", &self.threshold)
            .field("max_vcpus", &self.slots.len())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Attach `callback` to every instruction of a freshly translated block
pub fn instrument_block(block: &mut dyn TranslationBlock, callback: &InsnExecCallback) {
    for index in 0..block.instruction_count() {
        block.register_insn_exec(index, Arc::clone(callback));
    }
}

/// Report an unrecoverable error and terminate the process
fn fatal(err: &TracerError) -> ! {
    tracing::error!("insn tracer: fatal: {}", err);
    if !tracing::dispatcher::has_been_set() {
        eprintln!("insn tracer: fatal: {err}");
    }
    std::process::exit(1);
}
