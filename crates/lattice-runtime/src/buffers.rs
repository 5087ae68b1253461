//! Generation buffers
//!
//! All device memory one generation run needs, allocated once and reused by
//! every pass. Dropping the value releases it.

use lattice_interfaces::{DecodeInputs, DecodeOutputs, DeviceBuffer, DeviceContext};
use lattice_types::{LatticeError, RequestBatch, Result};
use tracing::{debug, info};

/// Input and output buffers of one run
#[derive(Debug)]
pub struct GenerationBuffers {
    batch_size: usize,
    beam_width: usize,
    max_input_len: usize,
    request_output_len: usize,
    total_output_len: usize,
    input_ids: Option<DeviceBuffer<i32>>,
    input_lengths: Option<DeviceBuffer<i32>>,
    output_ids: DeviceBuffer<i32>,
    parent_ids: DeviceBuffer<i32>,
    sequence_lengths: DeviceBuffer<i32>,
    scores: DeviceBuffer<f32>,
}

impl GenerationBuffers {
    /// Allocate every buffer for `batch` and upload its start tokens.
    ///
    /// Input buffers exist only for conditional requests.
    pub fn allocate(
        device: &dyn DeviceContext,
        batch: &RequestBatch,
        request_output_len: usize,
        max_seq_len: usize,
    ) -> Result<Self> {
        let total_output_len = Self::check_bounds(batch, request_output_len, max_seq_len)?;

        let num_sequences = batch.num_sequences();
        let (input_ids, input_lengths) = if batch.is_unconditional() {
            debug!("Unconditional request, no input buffers");
            (None, None)
        } else {
            (
                Some(device.upload_i32(&batch.start_ids)?),
                Some(device.upload_i32(&batch.start_lengths)?),
            )
        };

        let buffers = Self {
            batch_size: batch.batch_size,
            beam_width: batch.beam_width,
            max_input_len: batch.max_input_len,
            request_output_len,
            total_output_len,
            input_ids,
            input_lengths,
            output_ids: device.alloc_i32(num_sequences * total_output_len)?,
            parent_ids: device.alloc_i32(total_output_len * num_sequences)?,
            sequence_lengths: device.alloc_i32(num_sequences)?,
            scores: device.alloc_f32(request_output_len * num_sequences)?,
        };

        info!(
            "Allocated generation buffers on {}: batch {} x beam {}, total_output_len {}, {} bytes",
            device.name(),
            buffers.batch_size,
            buffers.beam_width,
            total_output_len,
            buffers.size_bytes()
        );
        Ok(buffers)
    }

    /// Validate `batch` against the sequence bound; returns `total_output_len`.
    ///
    /// Needs no device, so runs can reject a bad request before any collective.
    pub fn check_bounds(
        batch: &RequestBatch,
        request_output_len: usize,
        max_seq_len: usize,
    ) -> Result<usize> {
        let total_output_len = batch.total_output_len(request_output_len);
        if total_output_len > max_seq_len {
            return Err(LatticeError::invalid_parameter(format!(
                "total_output_len = max_input_len ({}) + request_output_len ({}) = {} \
                 should be <= max_seq_len ({})",
                batch.max_input_len, request_output_len, total_output_len, max_seq_len
            )));
        }
        batch.validate()?;
        Ok(total_output_len)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    pub fn max_input_len(&self) -> usize {
        self.max_input_len
    }

    pub fn request_output_len(&self) -> usize {
        self.request_output_len
    }

    /// `max_input_len + request_output_len`
    pub fn total_output_len(&self) -> usize {
        self.total_output_len
    }

    pub fn num_sequences(&self) -> usize {
        self.batch_size * self.beam_width
    }

    pub fn has_inputs(&self) -> bool {
        self.input_ids.is_some()
    }

    pub fn input_ids(&self) -> Option<&DeviceBuffer<i32>> {
        self.input_ids.as_ref()
    }

    pub fn input_lengths(&self) -> Option<&DeviceBuffer<i32>> {
        self.input_lengths.as_ref()
    }

    pub fn output_ids(&self) -> &DeviceBuffer<i32> {
        &self.output_ids
    }

    pub fn parent_ids(&self) -> &DeviceBuffer<i32> {
        &self.parent_ids
    }

    pub fn sequence_lengths(&self) -> &DeviceBuffer<i32> {
        &self.sequence_lengths
    }

    pub fn scores(&self) -> &DeviceBuffer<f32> {
        &self.scores
    }

    /// Device bytes held
    pub fn size_bytes(&self) -> usize {
        self.input_ids.as_ref().map_or(0, DeviceBuffer::size_bytes)
            + self.input_lengths.as_ref().map_or(0, DeviceBuffer::size_bytes)
            + self.output_ids.size_bytes()
            + self.parent_ids.size_bytes()
            + self.sequence_lengths.size_bytes()
            + self.scores.size_bytes()
    }

    /// Views handed to one forward call
    pub fn split_io(&mut self) -> (DecodeInputs<'_>, DecodeOutputs<'_>) {
        let inputs = DecodeInputs {
            input_ids: self.input_ids.as_ref(),
            input_lengths: self.input_lengths.as_ref(),
            batch_size: self.batch_size,
            beam_width: self.beam_width,
            max_input_len: self.max_input_len,
            max_output_seq_len: self.total_output_len,
        };
        let outputs = DecodeOutputs {
            output_ids: &mut self.output_ids,
            parent_ids: &mut self.parent_ids,
            sequence_lengths: &mut self.sequence_lengths,
            scores: &mut self.scores,
        };
        (inputs, outputs)
    }

    /// Copy the output ids to host memory
    pub async fn output_ids_host(&self, device: &dyn DeviceContext) -> Result<Vec<i32>> {
        device.download_i32(&self.output_ids).await
    }
}
