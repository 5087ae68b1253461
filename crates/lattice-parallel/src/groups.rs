//! Communicator group formation
//!
//! Forming the two groups of a rank takes two phases per group:
//!
//! 1. split the world into the rank's grid row (tensor group) and grid column
//!    (pipeline group);
//! 2. local rank 0 of each group generates a communicator id and broadcasts it
//!    inside that group, then every member joins with `(id, group size, local rank)`.
//!
//! A failure in either phase aborts the whole world group.

use crate::{grid::CartesianGrid, topology::ProcessTopology};
use lattice_interfaces::{CollectiveBackend, DeviceCommunicator, ProcessGroup};
use lattice_types::{CommUniqueId, GlobalRank, LatticeError, Result};
use std::{fmt, sync::Arc};
use tracing::{debug, info};

/// Axis a group spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Same pipeline rank, intra-layer sharding
    Tensor,
    /// Same tensor rank, inter-layer hand-off
    Pipeline,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Tensor => write!(f, "tensor"),
            GroupKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Host group plus device communicator of one axis.
///
/// Read-only after formation; dropping the last handle destroys the communicator.
#[derive(Debug, Clone)]
pub struct CommunicatorGroup {
    kind: GroupKind,
    host: Arc<dyn ProcessGroup>,
    communicator: Arc<dyn DeviceCommunicator>,
}

impl CommunicatorGroup {
    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn rank(&self) -> usize {
        self.host.rank()
    }

    pub fn size(&self) -> usize {
        self.host.size()
    }

    /// World ranks of the members, ordered by local rank
    pub fn members(&self) -> &[GlobalRank] {
        self.host.members()
    }

    pub fn contains(&self, rank: GlobalRank) -> bool {
        self.host.members().contains(&rank)
    }

    pub fn host(&self) -> &Arc<dyn ProcessGroup> {
        &self.host
    }

    pub fn communicator(&self) -> &Arc<dyn DeviceCommunicator> {
        &self.communicator
    }
}

/// Both groups of the local rank
#[derive(Debug, Clone)]
pub struct ParallelGroups {
    pub tensor: CommunicatorGroup,
    pub pipeline: CommunicatorGroup,
    pub grid: CartesianGrid,
    /// Previous pipeline stage of the local rank
    pub previous_stage: Option<GlobalRank>,
    /// Next pipeline stage of the local rank
    pub next_stage: Option<GlobalRank>,
}

/// Builds [`ParallelGroups`] from an already validated topology
pub struct CommunicatorGroupFormer<'a> {
    topology: &'a ProcessTopology,
    world: Arc<dyn ProcessGroup>,
    backend: Arc<dyn CollectiveBackend>,
}

impl<'a> CommunicatorGroupFormer<'a> {
    pub fn new(
        topology: &'a ProcessTopology,
        world: Arc<dyn ProcessGroup>,
        backend: Arc<dyn CollectiveBackend>,
    ) -> Self {
        Self {
            topology,
            world,
            backend,
        }
    }

    /// Form both groups; any failure aborts the world
    pub async fn form(&self) -> Result<ParallelGroups> {
        match self.form_groups().await {
            Ok(groups) => Ok(groups),
            Err(e) => {
                self.world
                    .abort(&format!("communicator group formation failed: {}", e));
                Err(e)
            }
        }
    }

    async fn form_groups(&self) -> Result<ParallelGroups> {
        let topology = self.topology;
        if self.world.size() != topology.world_size()
            || self.world.world_rank() != topology.rank()
        {
            return Err(LatticeError::topology(format!(
                "world group is rank {} of {} but topology expects rank {} of {}",
                self.world.world_rank(),
                self.world.size(),
                topology.rank(),
                topology.world_size()
            )));
        }

        let grid = topology.grid()?;
        let rank = topology.rank().get();
        let coords = topology.coordinates();

        let (color, key) = grid.sub_color_key(rank, [false, true])?;
        let tensor_host = self.world.split(color, key).await?;
        let (color, key) = grid.sub_color_key(rank, [true, false])?;
        let pipeline_host = self.world.split(color, key).await?;

        check_local_rank(
            GroupKind::Tensor,
            &tensor_host,
            coords.tensor_rank,
            topology.tensor_size(),
        )?;
        check_local_rank(
            GroupKind::Pipeline,
            &pipeline_host,
            coords.pipeline_rank,
            topology.pipeline_size(),
        )?;

        let tensor = self.join(GroupKind::Tensor, tensor_host).await?;
        let pipeline = self.join(GroupKind::Pipeline, pipeline_host).await?;

        let (previous_stage, next_stage) = grid.shift(rank, 0, 1)?;
        info!(
            "{} formed groups: tensor {}/{} {:?}, pipeline {}/{} {:?}",
            topology.rank(),
            tensor.rank(),
            tensor.size(),
            tensor.members(),
            pipeline.rank(),
            pipeline.size(),
            pipeline.members()
        );

        Ok(ParallelGroups {
            tensor,
            pipeline,
            grid,
            previous_stage: previous_stage.map(GlobalRank::new),
            next_stage: next_stage.map(GlobalRank::new),
        })
    }

    /// Root generates the id, the group broadcasts it, every member joins
    async fn join(
        &self,
        kind: GroupKind,
        host: Arc<dyn ProcessGroup>,
    ) -> Result<CommunicatorGroup> {
        let mut payload = if host.rank() == 0 {
            self.backend.generate_unique_id()?.as_bytes().to_vec()
        } else {
            Vec::new()
        };
        host.broadcast(&mut payload, 0).await?;

        let id = CommUniqueId::from_bytes(&payload).ok_or_else(|| {
            LatticeError::communication(format!(
                "{} group received a {}-byte communicator id",
                kind,
                payload.len()
            ))
        })?;
        debug!(
            "{} joining {} communicator {} as {}/{}",
            self.topology.rank(),
            kind,
            id,
            host.rank(),
            host.size()
        );

        let communicator = self.backend.init_rank(&id, host.size(), host.rank()).await?;
        Ok(CommunicatorGroup {
            kind,
            host,
            communicator,
        })
    }
}

fn check_local_rank(
    kind: GroupKind,
    host: &Arc<dyn ProcessGroup>,
    expected_rank: usize,
    expected_size: usize,
) -> Result<()> {
    if host.rank() != expected_rank || host.size() != expected_size {
        return Err(LatticeError::topology(format!(
            "{} group rank {} of {} does not match grid coordinate {} of {}",
            kind,
            host.rank(),
            host.size(),
            expected_rank,
            expected_size
        )));
    }
    Ok(())
}
