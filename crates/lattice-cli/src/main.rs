//! Lattice CLI - multi-rank GPT generation launcher

use clap::Parser;
use colored::*;
use lattice_cli::{
    load_config,
    output::{print_error, print_summary, OutputFormat, RunSummary},
    read_start_ids, resolve_start_ids_path,
    utils::{exit_code, root_cause, setup_logging},
    DEFAULT_CONFIG_PATH,
};
use lattice_engine::{launch_local, RunPlan, SyntheticEngineFactory};
use lattice_types::{LatticeError, Result};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "Tensor/pipeline parallel GPT generation launcher")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of ranks; defaults to tensor_para_size * pipeline_para_size
    #[arg(long, env = "WORLD_SIZE")]
    world_size: Option<usize>,

    /// Accelerators per node; rank r binds to r % devices
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Start-id file, overriding the configuration
    #[arg(long)]
    start_ids: Option<PathBuf>,

    /// Output ids file, overriding the configuration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose, cli.quiet) {
        eprintln!("{} Failed to setup logging: {}", "Error:".red().bold(), e);
    }

    let format = cli.format;
    let quiet = cli.quiet;
    match run(cli).await {
        Ok(summary) => {
            if !quiet {
                if let Err(e) = print_summary(&summary, format) {
                    print_error(&e);
                    std::process::exit(exit_code(&e));
                }
            }
        }
        Err(e) => {
            print_error(&e);
            std::process::exit(exit_code(&e));
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let config = load_config(&cli.config).await?;
    let instance = &config.ft_instance_hyperparameter;
    let tensor_para_size = instance.tensor_para_size;
    let pipeline_para_size = instance.pipeline_para_size;
    let world_size = match cli.world_size {
        Some(world_size) => world_size,
        None => instance.expected_world_size()?,
    };
    if cli.devices == 0 {
        return Err(LatticeError::config("--devices must be at least 1"));
    }

    let start_ids = resolve_start_ids_path(&cli.config, &config, cli.start_ids.as_deref());
    let batch = read_start_ids(
        &start_ids,
        config.request.request_batch_size,
        instance.beam_width,
        instance.end_id,
    )
    .await?;

    let mut plan = RunPlan::new(config, batch).with_device_count(cli.devices);
    if let Some(output) = cli.output {
        plan = plan.with_output_path(output);
    }
    debug!("Launching {} rank(s), run {}", world_size, plan.run_id);

    let results = launch_local(plan, world_size, Arc::new(SyntheticEngineFactory)).await?;
    let mut outcomes = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("P{} failed: {}", rank, e);
                errors.push(e);
            }
        }
    }
    if let Some(e) = root_cause(&errors) {
        return Err(e.clone());
    }

    Ok(RunSummary::new(tensor_para_size, pipeline_para_size, outcomes))
}
