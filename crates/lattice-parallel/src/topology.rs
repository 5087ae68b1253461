//! Process topology
//!
//! Every rank builds the same [`ProcessTopology`] from the configured parallel
//! sizes before touching any collective. All partition checks happen here so a
//! bad configuration fails identically on every rank and never reaches group
//! formation.

use crate::grid::CartesianGrid;
use lattice_interfaces::ModelShardConfig;
use lattice_types::{GlobalRank, LatticeError, ModelArchitecture, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a rank in the tensor/pipeline grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankCoordinates {
    pub tensor_rank: usize,
    pub pipeline_rank: usize,
}

impl fmt::Display for RankCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(tp {}, pp {})", self.tensor_rank, self.pipeline_rank)
    }
}

/// Topology of the local rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessTopology {
    world_size: usize,
    rank: GlobalRank,
    tensor_size: usize,
    pipeline_size: usize,
    coordinates: RankCoordinates,
}

impl ProcessTopology {
    /// Check the partition sizes against the world and locate `rank`
    pub fn new(
        world_size: usize,
        rank: GlobalRank,
        tensor_size: usize,
        pipeline_size: usize,
    ) -> Result<Self> {
        if tensor_size == 0 || pipeline_size == 0 {
            return Err(LatticeError::topology(format!(
                "tensor_para_size ({}) and pipeline_para_size ({}) must be positive",
                tensor_size, pipeline_size
            )));
        }
        let grid_size = tensor_size.checked_mul(pipeline_size).ok_or_else(|| {
            LatticeError::topology(format!(
                "tensor_para_size ({}) * pipeline_para_size ({}) overflows",
                tensor_size, pipeline_size
            ))
        })?;
        if grid_size != world_size {
            return Err(LatticeError::topology(format!(
                "tensor_para_size ({}) * pipeline_para_size ({}) should equal to world_size ({})",
                tensor_size, pipeline_size, world_size
            )));
        }
        if rank.get() >= world_size {
            return Err(LatticeError::topology(format!(
                "rank {} outside world of {} ranks",
                rank, world_size
            )));
        }

        let coordinates = RankCoordinates {
            tensor_rank: rank.get() % tensor_size,
            pipeline_rank: rank.get() / tensor_size,
        };

        Ok(Self {
            world_size,
            rank,
            tensor_size,
            pipeline_size,
            coordinates,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn rank(&self) -> GlobalRank {
        self.rank
    }

    pub fn tensor_size(&self) -> usize {
        self.tensor_size
    }

    pub fn pipeline_size(&self) -> usize {
        self.pipeline_size
    }

    pub fn coordinates(&self) -> RankCoordinates {
        self.coordinates
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank.is_coordinator()
    }

    /// Grid with dimensions `(pipeline_size, tensor_size)`
    pub fn grid(&self) -> Result<CartesianGrid> {
        CartesianGrid::new(self.pipeline_size, self.tensor_size)
    }

    /// Coordinates of any rank in the world
    pub fn coordinates_of(&self, rank: GlobalRank) -> Result<RankCoordinates> {
        if rank.get() >= self.world_size {
            return Err(LatticeError::topology(format!(
                "rank {} outside world of {} ranks",
                rank, self.world_size
            )));
        }
        Ok(RankCoordinates {
            tensor_rank: rank.get() % self.tensor_size,
            pipeline_rank: rank.get() / self.tensor_size,
        })
    }

    /// Inverse of [`Self::coordinates_of`]
    pub fn rank_of(&self, coordinates: RankCoordinates) -> Result<GlobalRank> {
        if coordinates.tensor_rank >= self.tensor_size
            || coordinates.pipeline_rank >= self.pipeline_size
        {
            return Err(LatticeError::topology(format!(
                "coordinates {} outside grid of tp {} x pp {}",
                coordinates, self.tensor_size, self.pipeline_size
            )));
        }
        Ok(GlobalRank::new(
            coordinates.pipeline_rank * self.tensor_size + coordinates.tensor_rank,
        ))
    }

    /// World ranks of the local tensor-parallel group, by tensor rank
    pub fn tensor_group_members(&self) -> Vec<GlobalRank> {
        let row_start = self.coordinates.pipeline_rank * self.tensor_size;
        (row_start..row_start + self.tensor_size)
            .map(GlobalRank::new)
            .collect()
    }

    /// World ranks of the local pipeline-parallel group, by pipeline rank
    pub fn pipeline_group_members(&self) -> Vec<GlobalRank> {
        (0..self.pipeline_size)
            .map(|stage| GlobalRank::new(stage * self.tensor_size + self.coordinates.tensor_rank))
            .collect()
    }

    /// Device ordinal the local rank binds to
    pub fn device_ordinal(&self, device_count: usize) -> usize {
        self.rank.get() % device_count.max(1)
    }

    /// Check that the model splits evenly across the grid
    pub fn validate_model_shape(&self, model: &ModelArchitecture) -> Result<()> {
        if model.head_num % self.tensor_size != 0 {
            return Err(LatticeError::topology(format!(
                "head_num ({}) % tensor_para_size ({}) should be 0",
                model.head_num, self.tensor_size
            )));
        }
        let layers_per_group = model.decoder_layers / self.pipeline_size;
        if layers_per_group * self.pipeline_size != model.decoder_layers {
            return Err(LatticeError::topology(format!(
                "layers_per_group ({}) * pipeline_para_size ({}) should equal to decoder_layers ({})",
                layers_per_group, self.pipeline_size, model.decoder_layers
            )));
        }
        Ok(())
    }

    /// Partition of `model` owned by the local rank
    pub fn shard_config(
        &self,
        model: &ModelArchitecture,
        max_seq_len: usize,
    ) -> Result<ModelShardConfig> {
        self.validate_model_shape(model)?;
        Ok(ModelShardConfig {
            head_num: model.head_num,
            size_per_head: model.size_per_head,
            hidden_units: model.hidden_units(),
            inter_size: model.inter_size(),
            vocab_size: model.vocab_size,
            total_layers: model.decoder_layers,
            max_seq_len,
            tensor_size: self.tensor_size,
            tensor_rank: self.coordinates.tensor_rank,
            pipeline_size: self.pipeline_size,
            pipeline_rank: self.coordinates.pipeline_rank,
        })
    }
}
