//! Decode engine interface
//!
//! The engine owns the model arithmetic. The coordinator side only guarantees
//! the shapes of the buffers it passes in and the order of the calls: the same
//! buffers are handed to every forward call of a run, so an engine must treat
//! their contents on entry as valid state rather than garbage.

use crate::{
    collective::DeviceCommunicator,
    device::DeviceContext,
    memory::DeviceBuffer,
    model::ModelShard,
    tensor::{MemoryKind, TensorDesc},
};
use async_trait::async_trait;
use lattice_types::{DataType, NumericKind, Result, SamplingSettings, TokenId};
use std::sync::Arc;

/// Inputs of one forward call.
///
/// `input_ids` and `input_lengths` are `None` for unconditional generation.
#[derive(Debug)]
pub struct DecodeInputs<'a> {
    pub input_ids: Option<&'a DeviceBuffer<i32>>,
    pub input_lengths: Option<&'a DeviceBuffer<i32>>,
    pub batch_size: usize,
    pub beam_width: usize,
    pub max_input_len: usize,
    /// Host scalar: prompt plus generated length
    pub max_output_seq_len: usize,
}

impl<'a> DecodeInputs<'a> {
    pub fn is_unconditional(&self) -> bool {
        self.input_ids.is_none()
    }

    pub fn num_sequences(&self) -> usize {
        self.batch_size * self.beam_width
    }

    /// Tokens generated after the prompt
    pub fn request_output_len(&self) -> usize {
        self.max_output_seq_len - self.max_input_len
    }

    /// Descriptors of the tensors present in this call
    pub fn descriptors(&self) -> Vec<TensorDesc> {
        let mut descs = Vec::with_capacity(3);
        if !self.is_unconditional() {
            descs.push(TensorDesc::new(
                "input_ids",
                MemoryKind::Gpu,
                DataType::INT32,
                vec![self.num_sequences(), self.max_input_len],
            ));
            descs.push(TensorDesc::new(
                "input_lengths",
                MemoryKind::Gpu,
                DataType::INT32,
                vec![self.num_sequences()],
            ));
        }
        descs.push(TensorDesc::new(
            "max_output_seq_len",
            MemoryKind::Cpu,
            DataType::INT32,
            vec![1],
        ));
        descs
    }
}

/// Outputs written by one forward call
#[derive(Debug)]
pub struct DecodeOutputs<'a> {
    /// `[batch, beam, total_output_len]`
    pub output_ids: &'a mut DeviceBuffer<i32>,
    /// `[total_output_len, batch, beam]`
    pub parent_ids: &'a mut DeviceBuffer<i32>,
    /// `[batch, beam]`
    pub sequence_lengths: &'a mut DeviceBuffer<i32>,
    /// `[request_output_len, batch, beam]`
    pub scores: &'a mut DeviceBuffer<f32>,
}

impl<'a> DecodeOutputs<'a> {
    /// Descriptors of the output tensors for the given shape
    pub fn descriptors(
        batch_size: usize,
        beam_width: usize,
        total_output_len: usize,
        request_output_len: usize,
    ) -> Vec<TensorDesc> {
        vec![
            TensorDesc::new(
                "output_ids",
                MemoryKind::Gpu,
                DataType::INT32,
                vec![batch_size, beam_width, total_output_len],
            ),
            TensorDesc::new(
                "parent_ids",
                MemoryKind::Gpu,
                DataType::INT32,
                vec![total_output_len, batch_size, beam_width],
            ),
            TensorDesc::new(
                "sequence_length",
                MemoryKind::Gpu,
                DataType::INT32,
                vec![batch_size, beam_width],
            ),
            TensorDesc::new(
                "output_log_probs",
                MemoryKind::Gpu,
                DataType::FP32,
                vec![request_output_len, batch_size, beam_width],
            ),
        ]
    }
}

/// Sharded generation model bound to one rank
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    /// Precision the engine was constructed with
    fn numeric_kind(&self) -> NumericKind;

    /// Run a full generation over the batch and fill every output buffer
    async fn forward(
        &self,
        outputs: &mut DecodeOutputs<'_>,
        inputs: &DecodeInputs<'_>,
        shard: &ModelShard,
    ) -> Result<()>;
}

/// Everything an engine is constructed from
#[derive(Clone)]
pub struct EngineContext {
    pub shard: ModelShard,
    pub sampling: SamplingSettings,
    /// Seed shared by every rank of the run
    pub random_seed: u64,
    pub start_id: TokenId,
    pub end_id: TokenId,
    pub tensor_comm: Arc<dyn DeviceCommunicator>,
    pub pipeline_comm: Arc<dyn DeviceCommunicator>,
    pub device: Arc<dyn DeviceContext>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("shard", &self.shard)
            .field("random_seed", &self.random_seed)
            .field("tensor_comm", &self.tensor_comm)
            .field("pipeline_comm", &self.pipeline_comm)
            .field("device", &self.device.name())
            .finish()
    }
}

/// Builds the engine for one rank
pub trait DecodeEngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, context: EngineContext) -> Result<Box<dyn DecodeEngine>>;
}
