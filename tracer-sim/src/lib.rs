//! Tracer Sim - Scripted execution engine for insn-tracer
//!
//! This crate implements the `insn_tracer` engine interfaces with simulated
//! x86-64 vCPUs running on real threads, so the tracer can be exercised end
//! to end without an emulator.

pub mod engine;
pub mod registers;

pub use engine::{RunSummary, SimBlock, SimEngine, Workload};
pub use registers::{SimRegister, SimRegisters};

use insn_tracer::{OutputSink, Tracer, TracerConfig};
use std::sync::Arc;

/// Result type for simulator operations
pub type Result<T> = anyhow::Result<T>;

/// Install a tracer on a fresh engine and run the workload through it
///
/// Returns the tracer (already finalized by the engine's exit hook) and the
/// engine's run summary.
pub fn trace_workload(
    max_vcpus: usize,
    block_size: usize,
    config: TracerConfig,
    sink: impl OutputSink + 'static,
    workload: &Workload,
) -> Result<(Arc<Tracer>, RunSummary)> {
    let mut engine = SimEngine::new(max_vcpus, block_size);
    let tracer = Tracer::install(&mut engine, config, sink)?;
    let summary = engine.run(workload)?;
    Ok((tracer, summary))
}
