//! Generation run orchestration for Lattice
//!
//! A rank goes through the same pipeline everywhere:
//!
//! 1. [`ProcessTopology`](lattice_parallel::ProcessTopology) validation
//! 2. communicator group formation and seed broadcast
//! 3. decode engine construction and buffer allocation
//! 4. warmup and measured passes ([`GenerationOrchestrator`])
//! 5. result collection on the coordinator ([`ResultCollector`])
//!
//! [`runner::run_rank`] drives one rank; [`runner::launch_local`] runs a whole
//! world in-process.

pub mod collector;
pub mod orchestrator;
pub mod runner;
pub mod synthetic;

pub use collector::{CollectedOutput, ResultCollector};
pub use orchestrator::{GenerationOrchestrator, OrchestratorState};
pub use runner::{launch_local, run_rank, RankOutcome, RunPlan};
pub use synthetic::{SyntheticDecodeEngine, SyntheticEngineFactory};
