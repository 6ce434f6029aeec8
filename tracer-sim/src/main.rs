//! Run simulated vCPUs under the instruction tracer, writing the trace to stdout

use anyhow::Context;
use clap::Parser;
use insn_tracer::{StdoutSink, TracerConfig};
use tracer_sim::{trace_workload, SimRegisters, Workload};

#[derive(Parser, Debug)]
#[command(name = "tracer-sim", about = "Trace registers of simulated x86-64 vCPUs")]
struct Args {
    /// Maximum number of vCPUs the engine reports
    #[arg(long, default_value_t = 4)]
    max_vcpus: usize,

    /// vCPUs that actually execute instructions
    #[arg(long, default_value_t = 1)]
    vcpus: usize,

    /// Instructions executed per vCPU
    #[arg(long, short = 'n', default_value_t = 1000)]
    instructions: u64,

    /// Instructions per translated block
    #[arg(long, default_value_t = 16)]
    block_size: usize,

    /// Seed for simulated register contents
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Registers the simulated vCPUs do not provide
    #[arg(long = "missing", value_delimiter = ',')]
    missing: Vec<String>,

    /// Tracer plugin arguments, e.g. `threshold=1000`
    #[arg(value_name = "PLUGIN_ARG")]
    plugin_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    insn_tracer::logging::init();
    let args = Args::parse();

    let config = TracerConfig::from_plugin_args(&args.plugin_args)
        .context("invalid tracer plugin arguments")?;

    let missing: Vec<&str> = args.missing.iter().map(String::as_str).collect();
    let workload = Workload::new(args.vcpus, args.instructions)
        .with_seed(args.seed)
        .with_registers(SimRegisters::x86_64().without(&missing));

    let (_tracer, summary) = trace_workload(
        args.max_vcpus,
        args.block_size,
        config,
        StdoutSink,
        &workload,
    )
    .context("simulation failed")?;

    tracing::info!(
        "simulation complete: {:?} instructions per vCPU, {} blocks translated",
        summary.executed,
        summary.blocks_translated
    );
    Ok(())
}
