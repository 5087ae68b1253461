//! Rank pipeline
//!
//! [`run_rank`] is the whole life of one rank: topology, groups, seed, engine,
//! buffers, passes, collection, report. Configuration problems surface before the
//! first collective; anything failing afterwards aborts the world.

use crate::{
    collector::{CollectedOutput, ResultCollector},
    orchestrator::{GenerationOrchestrator, OrchestratorState},
};
use lattice_interfaces::{
    DecodeEngineFactory, DeviceContext, EngineContext, ModelShard, ProcessGroup,
};
use lattice_parallel::{
    CommunicatorGroupFormer, LocalWorld, ProcessTopology, RankCoordinates, RankHandles,
};
use lattice_runtime::{CpuDevice, GenerationBuffers};
use lattice_types::{
    GenerationConfig, GlobalRank, LatencyReport, MemoryUsage, RequestBatch, Result, RunId,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};

/// Everything every rank needs to run
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: GenerationConfig,
    pub batch: RequestBatch,
    /// Accelerators available per node; ranks bind to `rank % device_count`
    pub device_count: usize,
    pub output_path: PathBuf,
    pub run_id: RunId,
}

impl RunPlan {
    pub fn new(config: GenerationConfig, batch: RequestBatch) -> Self {
        let output_path = config.run.output_file.clone();
        Self {
            config,
            batch,
            device_count: 1,
            output_path,
            run_id: RunId::new(),
        }
    }

    pub fn with_device_count(mut self, device_count: usize) -> Self {
        self.device_count = device_count;
        self
    }

    pub fn with_output_path(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = output_path.into();
        self
    }
}

/// What one rank reports back
#[derive(Debug, Clone, Serialize)]
pub struct RankOutcome {
    pub rank: GlobalRank,
    pub coordinates: RankCoordinates,
    pub device: String,
    pub random_seed: u64,
    pub state: OrchestratorState,
    /// Coordinator only
    pub report: Option<LatencyReport>,
    /// Coordinator only
    pub collected: Option<CollectedOutput>,
    /// Device memory at the end of the run, buffers still held
    pub memory: MemoryUsage,
}

/// Run one rank to completion
pub async fn run_rank(
    handles: RankHandles,
    plan: Arc<RunPlan>,
    factory: Arc<dyn DecodeEngineFactory>,
) -> Result<RankOutcome> {
    let world = handles.world.clone();
    let result = rank_pipeline(handles, &plan, factory.as_ref()).await;
    if let Err(e) = &result {
        world.abort(&e.to_string());
    }
    result
}

async fn rank_pipeline(
    handles: RankHandles,
    plan: &RunPlan,
    factory: &dyn DecodeEngineFactory,
) -> Result<RankOutcome> {
    plan.config.validate()?;
    let instance = &plan.config.ft_instance_hyperparameter;
    let model = plan.config.model()?;

    let topology = ProcessTopology::new(
        handles.world.size(),
        handles.rank,
        instance.tensor_para_size,
        instance.pipeline_para_size,
    )?;
    topology.validate_model_shape(model)?;
    GenerationBuffers::check_bounds(
        &plan.batch,
        plan.config.request.request_output_len,
        instance.max_seq_len,
    )?;
    let shard_config = topology.shard_config(model, instance.max_seq_len)?;
    let numeric_kind = instance.numeric_kind()?;
    debug!("{} at {}", topology.rank(), topology.coordinates());

    let groups = CommunicatorGroupFormer::new(
        &topology,
        handles.world.clone(),
        handles.backend.clone(),
    )
    .form()
    .await?;

    let random_seed = shared_seed(&topology, handles.world.as_ref(), instance.random_seed).await?;

    let device: Arc<dyn DeviceContext> =
        Arc::new(CpuDevice::new(topology.device_ordinal(plan.device_count)));
    let shard = ModelShard::new(shard_config, numeric_kind, PathBuf::from(&instance.model_dir));

    let engine = factory.create(EngineContext {
        shard: shard.clone(),
        sampling: instance.sampling(),
        random_seed,
        start_id: instance.start_id,
        end_id: instance.end_id,
        tensor_comm: groups.tensor.communicator().clone(),
        pipeline_comm: groups.pipeline.communicator().clone(),
        device: device.clone(),
    })?;
    info!(
        "{} built {} engine ({}) on {}",
        topology.rank(),
        factory.name(),
        engine.numeric_kind(),
        device.name()
    );

    let mut orchestrator = GenerationOrchestrator::new(
        topology.clone(),
        handles.world.clone(),
        device.clone(),
        engine,
        shard,
    );
    orchestrator.prepare(
        &plan.batch,
        plan.config.request.request_output_len,
        instance.max_seq_len,
    )?;
    orchestrator.run_warmup(plan.config.run.warmup_iterations).await?;
    orchestrator
        .run_measured(plan.config.run.measured_iterations)
        .await?;

    let collector = ResultCollector::new(plan.output_path.clone());
    let collected = match orchestrator.buffers() {
        Some(buffers) => collector.collect(&topology, device.as_ref(), buffers).await?,
        None => None,
    };
    let report = orchestrator.report(plan.run_id.clone())?;

    Ok(RankOutcome {
        rank: topology.rank(),
        coordinates: topology.coordinates(),
        device: device.name(),
        random_seed,
        state: orchestrator.state(),
        report,
        collected,
        memory: device.memory_usage(),
    })
}

/// Coordinator's seed, broadcast over the world when there is more than one rank
async fn shared_seed(
    topology: &ProcessTopology,
    world: &dyn ProcessGroup,
    configured: Option<u64>,
) -> Result<u64> {
    let local = if topology.is_coordinator() {
        configured.unwrap_or_else(rand::random)
    } else {
        0
    };
    if topology.world_size() == 1 {
        return Ok(local);
    }
    let seed = world.broadcast_u64(local, 0).await?;
    debug!("{} uses random seed {}", topology.rank(), seed);
    Ok(seed)
}

/// Run every rank of `world_size` in-process; results are in rank order
pub async fn launch_local(
    plan: RunPlan,
    world_size: usize,
    factory: Arc<dyn DecodeEngineFactory>,
) -> Result<Vec<Result<RankOutcome>>> {
    let world = LocalWorld::new(world_size)?;
    let plan = Arc::new(plan);
    world
        .run(move |handles| run_rank(handles, plan.clone(), factory.clone()))
        .await
}
