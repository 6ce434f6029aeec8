//! Interfaces consumed from the execution engine
//!
//! The tracer never drives execution itself. An engine (an emulator plugin
//! host, or the scripted engine in `tracer-sim`) implements these traits and
//! invokes the registered callbacks: block translation whenever new code is
//! compiled, instruction execution once per executed instruction, and the exit
//! hook exactly once at shutdown.

use std::sync::Arc;

/// Opaque handle to a resolved register
///
/// Only meaningful for reads on the execution context that resolved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterHandle(pub usize);

/// Register resolution and raw read facility of one execution context
pub trait RegisterAccess {
    /// Resolve a register name, or `None` if this context has no such register
    fn find_register(&self, name: &str) -> Option<RegisterHandle>;

    /// Append the current raw value of `handle` to `buf`
    ///
    /// Bytes are little-endian; the number of bytes appended is the
    /// register's width.
    fn read_register(&self, handle: RegisterHandle, buf: &mut Vec<u8>);
}

/// Instruction execution callback: `(vcpu_index, registers)`
pub type InsnExecCallback = Arc<dyn Fn(usize, &dyn RegisterAccess) + Send + Sync>;

/// Block translation callback, invoked once per newly translated block
pub type BlockTranslatedCallback = Box<dyn Fn(&mut dyn TranslationBlock) + Send + Sync>;

/// Process exit callback
pub type ExitCallback = Box<dyn FnOnce() + Send>;

/// A freshly translated block of guest instructions
pub trait TranslationBlock {
    /// Number of instructions in the block
    fn instruction_count(&self) -> usize;

    /// Attach `callback` to run before instruction `index` every time it executes
    fn register_insn_exec(&mut self, index: usize, callback: InsnExecCallback);
}

/// Hooks the tracer installs into at startup
pub trait Engine {
    /// Maximum number of concurrently existing execution contexts
    ///
    /// Queried once at install time and assumed stable afterwards.
    fn max_vcpus(&self) -> usize;

    /// Register the callback fired for every translated block
    fn register_block_translated(&mut self, callback: BlockTranslatedCallback);

    /// Register the single-fire process exit callback
    fn register_exit(&mut self, callback: ExitCallback);
}
