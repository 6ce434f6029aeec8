//! Scripted multi-vCPU execution engine
//!
//! Each vCPU runs on its own OS thread. Execution proceeds in translated
//! blocks: the engine asks the block translation hook to instrument a block,
//! then runs its instructions, invoking every attached callback before each
//! instruction. When all vCPUs have finished the exit hook fires once.

use std::thread;

use anyhow::{anyhow, ensure, Context};
use insn_tracer::{BlockTranslatedCallback, Engine, ExitCallback, InsnExecCallback, TranslationBlock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::registers::SimRegisters;
use crate::Result;

/// What the simulated machine executes
#[derive(Debug, Clone)]
pub struct Workload {
    /// Number of vCPUs that execute; the rest stay idle
    pub active_vcpus: usize,
    /// Instructions executed by each active vCPU
    pub instructions: u64,
    /// Base seed; vCPU `i` uses `seed + i`
    pub seed: u64,
    /// Register file every vCPU starts from
    pub registers: SimRegisters,
}

impl Workload {
    pub fn new(active_vcpus: usize, instructions: u64) -> Self {
        Self {
            active_vcpus,
            instructions,
            seed: 0,
            registers: SimRegisters::x86_64(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_registers(mut self, registers: SimRegisters) -> Self {
        self.registers = registers;
        self
    }
}

/// Instructions executed per vCPU, by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: Vec<u64>,
    pub blocks_translated: u64,
}

/// Block under translation: collects the callbacks attached to each instruction
#[derive(Default)]
pub struct SimBlock {
    callbacks: Vec<Vec<InsnExecCallback>>,
}

impl SimBlock {
    pub fn new(instructions: usize) -> Self {
        Self {
            callbacks: (0..instructions).map(|_| Vec::new()).collect(),
        }
    }

    /// Callbacks attached to instruction `index`
    pub fn callbacks(&self, index: usize) -> &[InsnExecCallback] {
        self.callbacks.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl TranslationBlock for SimBlock {
    fn instruction_count(&self) -> usize {
        self.callbacks.len()
    }

    fn register_insn_exec(&mut self, index: usize, callback: InsnExecCallback) {
        if let Some(slot) = self.callbacks.get_mut(index) {
            slot.push(callback);
        }
    }
}

/// Engine that executes a [`Workload`] on scripted vCPUs
pub struct SimEngine {
    max_vcpus: usize,
    block_size: usize,
    on_block: Vec<BlockTranslatedCallback>,
    on_exit: Vec<ExitCallback>,
}

impl SimEngine {
    /// Create an engine with room for `max_vcpus` vCPUs and blocks of `block_size` instructions
    pub fn new(max_vcpus: usize, block_size: usize) -> Self {
        Self {
            max_vcpus,
            block_size: block_size.max(1),
            on_block: Vec::new(),
            on_exit: Vec::new(),
        }
    }

    /// Run the workload to completion, then fire the exit hooks
    ///
    /// Consumes the engine, so exit hooks can fire only once.
    pub fn run(self, workload: &Workload) -> Result<RunSummary> {
        ensure!(
            workload.active_vcpus <= self.max_vcpus,
            "workload uses {} vCPUs but the engine has {}",
            workload.active_vcpus,
            self.max_vcpus
        );
        tracing::info!(
            "running {} vCPUs x {} instructions (block size {})",
            workload.active_vcpus,
            workload.instructions,
            self.block_size
        );

        let on_block = self.on_block;
        let block_size = self.block_size;

        let results: Vec<(u64, u64)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workload.active_vcpus)
                .map(|vcpu| {
                    let on_block = &on_block;
                    thread::Builder::new()
                        .name(format!("vcpu-{vcpu}"))
                        .spawn_scoped(scope, move || {
                            run_vcpu(vcpu, workload, block_size, on_block)
                        })
                        .with_context(|| format!("failed to spawn vcpu-{vcpu}"))
                })
                .collect::<Result<Vec<_>>>()?;

            handles
                .into_iter()
                .enumerate()
                .map(|(vcpu, handle)| {
                    handle
                        .join()
                        .map_err(|_| anyhow!("vcpu-{vcpu} panicked"))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for hook in self.on_exit {
            hook();
        }

        let blocks_translated = results.iter().map(|(_, blocks)| blocks).sum();
        Ok(RunSummary {
            executed: results.into_iter().map(|(executed, _)| executed).collect(),
            blocks_translated,
        })
    }
}

/// Execute one vCPU's share of the workload; returns `(instructions, blocks)`
fn run_vcpu(
    vcpu: usize,
    workload: &Workload,
    block_size: usize,
    on_block: &[BlockTranslatedCallback],
) -> (u64, u64) {
    let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(vcpu as u64));
    let mut regs = workload.registers.clone();
    let mut executed = 0u64;
    let mut blocks = 0u64;

    while executed < workload.instructions {
        let remaining = workload.instructions - executed;
        let len = (block_size as u64).min(remaining) as usize;

        let mut block = SimBlock::new(len);
        for hook in on_block {
            hook(&mut block);
        }
        blocks += 1;

        for index in 0..len {
            for callback in block.callbacks(index) {
                callback(vcpu, &regs);
            }
            regs.step(&mut rng);
            executed += 1;
        }
    }

    tracing::debug!("vcpu-{} done: {} instructions in {} blocks", vcpu, executed, blocks);
    (executed, blocks)
}

impl Engine for SimEngine {
    fn max_vcpus(&self) -> usize {
        self.max_vcpus
    }

    fn register_block_translated(&mut self, callback: BlockTranslatedCallback) {
        self.on_block.push(callback);
    }

    fn register_exit(&mut self, callback: ExitCallback) {
        self.on_exit.push(callback);
    }
}
