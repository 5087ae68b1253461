//! Warmup and measured generation passes
//!
//! ```text
//! Uninitialized ─prepare─▶ BuffersReady ─run_warmup─▶ WarmedUp ─run_measured─▶ Measured ─report─▶ Reported
//!        └──────────────────────any failure──────────────────────────▶ Failed
//! ```
//!
//! Each pass is bracketed by a device synchronize plus a world barrier, so every
//! rank enters and leaves a pass together. Only the coordinator reads the clock.
//! A failure inside a pass aborts the world: a partially executed collective
//! step cannot be retried consistently across ranks.

use lattice_interfaces::{DecodeEngine, DeviceContext, ModelShard, ProcessGroup};
use lattice_parallel::ProcessTopology;
use lattice_runtime::GenerationBuffers;
use lattice_types::{LatencyReport, LatticeError, RequestBatch, Result, RunId};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Uninitialized,
    BuffersReady,
    WarmedUp,
    Measured,
    Reported,
    Failed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives the decode engine of one rank through a run
pub struct GenerationOrchestrator {
    topology: ProcessTopology,
    world: Arc<dyn ProcessGroup>,
    device: Arc<dyn DeviceContext>,
    engine: Box<dyn DecodeEngine>,
    shard: ModelShard,
    state: OrchestratorState,
    buffers: Option<GenerationBuffers>,
    measured_iterations: usize,
    measured_time: Option<Duration>,
}

impl GenerationOrchestrator {
    pub fn new(
        topology: ProcessTopology,
        world: Arc<dyn ProcessGroup>,
        device: Arc<dyn DeviceContext>,
        engine: Box<dyn DecodeEngine>,
        shard: ModelShard,
    ) -> Self {
        Self {
            topology,
            world,
            device,
            engine,
            shard,
            state: OrchestratorState::Uninitialized,
            buffers: None,
            measured_iterations: 0,
            measured_time: None,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn topology(&self) -> &ProcessTopology {
        &self.topology
    }

    pub fn device(&self) -> &Arc<dyn DeviceContext> {
        &self.device
    }

    /// Buffers shared by every pass, once allocated
    pub fn buffers(&self) -> Option<&GenerationBuffers> {
        self.buffers.as_ref()
    }

    /// Allocate the buffers for `batch` and upload its start tokens
    pub fn prepare(
        &mut self,
        batch: &RequestBatch,
        request_output_len: usize,
        max_seq_len: usize,
    ) -> Result<()> {
        self.expect_state(OrchestratorState::Uninitialized, "prepare")?;
        let allocated = GenerationBuffers::allocate(
            self.device.as_ref(),
            batch,
            request_output_len,
            max_seq_len,
        );
        match allocated {
            Ok(buffers) => {
                self.buffers = Some(buffers);
                self.state = OrchestratorState::BuffersReady;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Absorb one-time engine costs; not timed
    pub async fn run_warmup(&mut self, iterations: usize) -> Result<()> {
        self.expect_state(OrchestratorState::BuffersReady, "run_warmup")?;
        match self.run_pass("warmup", iterations, false).await {
            Ok(_) => {
                self.state = OrchestratorState::WarmedUp;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Timed pass; returns the elapsed time on the coordinator
    pub async fn run_measured(&mut self, iterations: usize) -> Result<Option<Duration>> {
        self.expect_state(OrchestratorState::WarmedUp, "run_measured")?;
        match self.run_pass("measured", iterations, true).await {
            Ok(elapsed) => {
                self.measured_iterations = iterations;
                self.measured_time = elapsed;
                self.state = OrchestratorState::Measured;
                Ok(elapsed)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Close the run; the coordinator gets the latency report
    pub fn report(&mut self, run_id: RunId) -> Result<Option<LatencyReport>> {
        self.expect_state(OrchestratorState::Measured, "report")?;
        self.state = OrchestratorState::Reported;

        let (Some(total_time), Some(buffers)) = (self.measured_time, self.buffers.as_ref()) else {
            return Ok(None);
        };
        let config = &self.shard.config;
        let report = LatencyReport {
            run_id,
            request_batch_size: buffers.batch_size(),
            beam_width: buffers.beam_width(),
            head_num: config.head_num,
            size_per_head: config.size_per_head,
            total_output_len: buffers.total_output_len(),
            decoder_layers: config.total_layers,
            vocab_size: config.vocab_size,
            tensor_para_size: config.tensor_size,
            pipeline_para_size: config.pipeline_size,
            iterations: self.measured_iterations,
            total_time,
            measured_at: chrono::Utc::now(),
        };
        info!("{}", report);
        Ok(Some(report))
    }

    fn expect_state(&self, expected: OrchestratorState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(LatticeError::internal(format!(
                "{} requires state {}, orchestrator is {}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }

    /// Record a fatal error and abort every peer
    fn fail(&mut self, e: LatticeError) -> LatticeError {
        error!("{} failed in state {}: {}", self.topology.rank(), self.state, e);
        self.state = OrchestratorState::Failed;
        self.world.abort(&e.to_string());
        e
    }

    /// Device completion plus world barrier
    async fn synchronize_all(&self) -> Result<()> {
        self.device.synchronize().await?;
        self.world.barrier().await
    }

    /// One pass; the coordinator reads the clock only when `timed`
    async fn run_pass(
        &mut self,
        label: &str,
        iterations: usize,
        timed: bool,
    ) -> Result<Option<Duration>> {
        if iterations == 0 {
            return Err(LatticeError::invalid_parameter(format!(
                "{} pass needs at least one iteration",
                label
            )));
        }

        self.synchronize_all().await?;
        let start = (timed && self.topology.is_coordinator()).then(Instant::now);

        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| LatticeError::internal("generation buffers not allocated"))?;
        for iteration in 0..iterations {
            debug!(
                "{} {} iteration {}/{}",
                self.topology.rank(),
                label,
                iteration + 1,
                iterations
            );
            let (inputs, mut outputs) = buffers.split_io();
            self.engine.forward(&mut outputs, &inputs, &self.shard).await?;
        }

        self.device.synchronize().await?;
        self.world.barrier().await?;

        let elapsed = start.map(|start| start.elapsed());
        if let Some(elapsed) = elapsed {
            info!(
                "{} pass: {} iteration(s) in {:.2} ms",
                label,
                iterations,
                elapsed.as_secs_f64() * 1000.0
            );
        }
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticEngineFactory;
    use lattice_interfaces::{DecodeEngineFactory, EngineContext, ModelShardConfig};
    use lattice_parallel::{CommunicatorGroupFormer, LocalWorld};
    use lattice_runtime::CpuDevice;
    use lattice_types::{GlobalRank, ModelArchitecture, NumericKind, SamplingSettings};
    use std::path::PathBuf;

    async fn single_rank_orchestrator(world: &LocalWorld) -> GenerationOrchestrator {
        let handles = world.fabric().world_group(GlobalRank::new(0)).unwrap();
        let backend = world.fabric().collective_backend();
        let topology = ProcessTopology::new(1, GlobalRank::new(0), 1, 1).unwrap();
        let groups = CommunicatorGroupFormer::new(&topology, handles.clone(), backend)
            .form()
            .await
            .unwrap();

        let model = ModelArchitecture {
            head_num: 4,
            size_per_head: 4,
            vocab_size: 31,
            decoder_layers: 2,
        };
        let shard_config: ModelShardConfig = topology.shard_config(&model, 16).unwrap();
        let shard = ModelShard::new(shard_config, NumericKind::Fp32, PathBuf::from("models"));
        let device: Arc<dyn DeviceContext> = Arc::new(CpuDevice::new(0));
        let engine = SyntheticEngineFactory
            .create(EngineContext {
                shard: shard.clone(),
                sampling: SamplingSettings::default(),
                random_seed: 3,
                start_id: 0,
                end_id: 30,
                tensor_comm: groups.tensor.communicator().clone(),
                pipeline_comm: groups.pipeline.communicator().clone(),
                device: device.clone(),
            })
            .unwrap();
        GenerationOrchestrator::new(topology, handles, device, engine, shard)
    }

    #[tokio::test]
    async fn only_the_measured_pass_reads_the_clock() {
        let world = LocalWorld::new(1).unwrap();
        let mut orchestrator = single_rank_orchestrator(&world).await;
        orchestrator
            .prepare(&RequestBatch::unconditional(1, 1), 4, 16)
            .unwrap();

        assert!(orchestrator.run_pass("warmup", 1, false).await.unwrap().is_none());
        assert!(orchestrator.run_pass("measured", 1, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_iterations_are_rejected() {
        let world = LocalWorld::new(1).unwrap();
        let mut orchestrator = single_rank_orchestrator(&world).await;
        orchestrator
            .prepare(&RequestBatch::unconditional(1, 1), 4, 16)
            .unwrap();
        assert!(orchestrator.run_warmup(0).await.is_err());
        assert_eq!(orchestrator.state(), OrchestratorState::Failed);
    }
}
