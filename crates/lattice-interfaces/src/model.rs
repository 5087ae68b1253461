//! Model shard description

use lattice_types::NumericKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-rank view of the model partition.
///
/// Built by the topology after the partition invariants have been checked, so
/// `head_num % tensor_size == 0` and `total_layers % pipeline_size == 0` hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShardConfig {
    pub head_num: usize,
    pub size_per_head: usize,
    pub hidden_units: usize,
    pub inter_size: usize,
    pub vocab_size: usize,
    pub total_layers: usize,
    pub max_seq_len: usize,
    pub tensor_size: usize,
    pub tensor_rank: usize,
    pub pipeline_size: usize,
    pub pipeline_rank: usize,
}

impl ModelShardConfig {
    /// Decoder layers owned by every pipeline stage
    pub fn layers_per_stage(&self) -> usize {
        self.total_layers / self.pipeline_size
    }

    /// Contiguous layers owned by this stage
    pub fn layer_range(&self) -> LayerRange {
        let per_stage = self.layers_per_stage();
        let start = self.pipeline_rank * per_stage;
        LayerRange::new(start, start + per_stage)
    }

    /// Attention heads computed by this tensor rank
    pub fn local_head_num(&self) -> usize {
        self.head_num / self.tensor_size
    }

    pub fn local_hidden_units(&self) -> usize {
        self.local_head_num() * self.size_per_head
    }

    /// Vocabulary ids `[start, end)` whose logits this tensor rank produces.
    ///
    /// The vocabulary need not divide evenly: shards take `ceil(vocab / tp)` ids
    /// and the trailing shard may be shorter or empty.
    pub fn vocab_shard(&self) -> LayerRange {
        let per_rank = self.vocab_size.div_ceil(self.tensor_size);
        let start = (self.tensor_rank * per_rank).min(self.vocab_size);
        let end = (start + per_rank).min(self.vocab_size);
        LayerRange::new(start, end)
    }

    pub fn is_first_stage(&self) -> bool {
        self.pipeline_rank == 0
    }

    pub fn is_last_stage(&self) -> bool {
        self.pipeline_rank + 1 == self.pipeline_size
    }
}

/// Half-open index range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRange {
    /// First index (inclusive)
    pub start: usize,
    /// Last index (exclusive)
    pub end: usize,
}

impl LayerRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

/// Model shard handed to every forward call.
///
/// Weights are owned by the decode engine; the shard names the partition and
/// where its weight files live.
#[derive(Debug, Clone)]
pub struct ModelShard {
    pub config: ModelShardConfig,
    pub numeric_kind: NumericKind,
    pub model_dir: PathBuf,
}

impl ModelShard {
    pub fn new(config: ModelShardConfig, numeric_kind: NumericKind, model_dir: PathBuf) -> Self {
        Self {
            config,
            numeric_kind,
            model_dir,
        }
    }

    /// Weight file directory for this tensor split, `<model_dir>/<tp>-gpu`
    pub fn weights_dir(&self) -> PathBuf {
        self.model_dir.join(format!("{}-gpu", self.config.tensor_size))
    }
}
