//! Instruction Tracer - per-instruction register capture for emulated vCPUs
//!
//! This crate plugs into an execution engine's translation and execution hooks
//! and, for every executed instruction, records the current value of a fixed
//! set of registers on the vCPU that executed it.
//!
//! # Overview
//!
//! * One lazily initialized state slot per vCPU, sized once at install time
//! * Register names resolved to handles once per vCPU and reused afterwards
//! * Output buffered per vCPU and written in one chunk every `threshold`
//!   instructions, with a final flush when the engine exits
//!
//! Each traced register produces one line:
//!
//! ```text
//! cpu=0, rax=00000001, size=4
//! cpu=0, rbx=0000000000000002, size=8
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use insn_tracer::{Engine, StdoutSink, Tracer, TracerConfig};
//!
//! fn install(engine: &mut dyn Engine, args: &[String]) -> insn_tracer::Result<()> {
//!     insn_tracer::logging::init();
//!     let config = TracerConfig::from_plugin_args(args)?;
//!     Tracer::install(engine, config, StdoutSink)?;
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! * Registers a vCPU cannot resolve are silently left out of its records.
//! * A register read of any width other than 4 or 8 bytes, or a failed write
//!   to the output sink, is fatal: inside engine callbacks the process exits
//!   with a diagnostic naming the vCPU and register.

pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod report;
pub mod sink;
pub mod snapshot;
pub mod tracer;

pub use catalog::{RegisterCatalog, RegisterSpec, ResolvedRegister};
pub use config::{TracerConfig, DEFAULT_FLUSH_THRESHOLD};
pub use context::{ContextSlot, ContextState, ContextSummary};
pub use engine::{
    BlockTranslatedCallback, Engine, ExitCallback, InsnExecCallback, RegisterAccess,
    RegisterHandle, TranslationBlock,
};
pub use error::TracerError;
pub use report::ReportBuffer;
pub use sink::{OutputSink, StdoutSink, WriterSink};
pub use snapshot::{format_line, RegisterValue};
pub use tracer::{instrument_block, FinalizeReport, Phase, Tracer};

/// Result type for tracer operations
pub type Result<T> = std::result::Result<T, TracerError>;
