//! Output formatting utilities

use colored::*;
use lattice_engine::RankOutcome;
use lattice_types::{LatencyReport, LatticeError, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Summary of a finished run, as seen by the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub world_size: usize,
    pub tensor_para_size: usize,
    pub pipeline_para_size: usize,
    pub report: Option<LatencyReport>,
    pub output_path: Option<PathBuf>,
    pub written: bool,
    pub zero_count: usize,
    pub ranks: Vec<RankOutcome>,
}

impl RunSummary {
    pub fn new(
        tensor_para_size: usize,
        pipeline_para_size: usize,
        ranks: Vec<RankOutcome>,
    ) -> Self {
        let coordinator = ranks.iter().find(|outcome| outcome.rank.is_coordinator());
        let report = coordinator.and_then(|outcome| outcome.report.clone());
        let collected = coordinator.and_then(|outcome| outcome.collected.as_ref());
        Self {
            world_size: ranks.len(),
            tensor_para_size,
            pipeline_para_size,
            report,
            output_path: collected.map(|c| c.path.clone()),
            written: collected.map_or(false, |c| c.written),
            zero_count: collected.map_or(0, |c| c.zero_count),
            ranks,
        }
    }
}

/// Print the run summary to stdout
pub fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(summary).map_err(|e| {
                LatticeError::serialization(format!("JSON serialization failed: {}", e))
            })?;
            println!("{}", output);
        }
        OutputFormat::Pretty => print_pretty(summary),
    }
    Ok(())
}

fn print_pretty(summary: &RunSummary) {
    println!(
        "{} {} rank(s), tensor_para_size {}, pipeline_para_size {}",
        "Run:".bold(),
        summary.world_size,
        summary.tensor_para_size,
        summary.pipeline_para_size
    );
    for outcome in &summary.ranks {
        println!(
            "  {} {} on {} seed {} [{}]",
            outcome.rank.to_string().cyan(),
            outcome.coordinates,
            outcome.device,
            outcome.random_seed,
            outcome.state
        );
    }
    if let Some(report) = &summary.report {
        println!("{} {}", "Latency:".bold(), report);
        println!(
            "  {:.1} tokens/s over {} measured iteration(s)",
            report.tokens_per_second(),
            report.iterations
        );
    }
    match &summary.output_path {
        Some(path) if summary.written => print_success(&format!(
            "Wrote output ids to {} (zero count = {})",
            path.display(),
            summary.zero_count
        )),
        Some(path) => print_warning(&format!(
            "Cannot write results into output file {}",
            path.display()
        )),
        None => {}
    }
}

/// Print error with formatting
pub fn print_error(error: &LatticeError) {
    eprintln!("{} {}", "Error:".red().bold(), error);
}

/// Print warning with formatting
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow().bold(), message);
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✅".green(), message.green());
}
