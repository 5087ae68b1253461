//! Request batch shapes

use crate::{LatticeError, Result, TokenId};
use serde::{Deserialize, Serialize};

/// Start tokens of one generation request batch, already expanded per beam.
///
/// `start_ids` is row-major `[batch_size * beam_width, max_input_len]` and
/// `start_lengths` is `[batch_size * beam_width]`. A `max_input_len` of zero means
/// unconditional generation: both vectors are empty and the decode engine gets no
/// input buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBatch {
    pub batch_size: usize,
    pub beam_width: usize,
    pub max_input_len: usize,
    pub start_ids: Vec<TokenId>,
    pub start_lengths: Vec<i32>,
}

impl RequestBatch {
    /// Batch without a prompt
    pub fn unconditional(batch_size: usize, beam_width: usize) -> Self {
        Self {
            batch_size,
            beam_width,
            max_input_len: 0,
            start_ids: Vec::new(),
            start_lengths: Vec::new(),
        }
    }

    /// Build a batch from prompt rows.
    ///
    /// Rows shorter than the longest row are padded with `end_id`. When fewer rows
    /// than `batch_size` are given, the batch is filled with full-length `end_id`
    /// rows. Rows past `batch_size` are not part of the batch. Every row is repeated
    /// `beam_width` times.
    pub fn from_sequences(
        rows: &[Vec<TokenId>],
        batch_size: usize,
        beam_width: usize,
        end_id: TokenId,
    ) -> Self {
        let rows = &rows[..rows.len().min(batch_size)];
        let max_input_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        if max_input_len == 0 {
            return Self::unconditional(batch_size, beam_width);
        }

        let num_sequences = batch_size * beam_width;
        let mut start_ids = Vec::with_capacity(num_sequences * max_input_len);
        let mut start_lengths = Vec::with_capacity(num_sequences);

        for row_idx in 0..batch_size {
            let (row, length) = match rows.get(row_idx) {
                Some(row) => (row.as_slice(), row.len()),
                None => (&[][..], max_input_len),
            };
            for _ in 0..beam_width {
                start_ids.extend_from_slice(row);
                start_ids.extend(std::iter::repeat(end_id).take(max_input_len - row.len()));
                start_lengths.push(length as i32);
            }
        }

        Self {
            batch_size,
            beam_width,
            max_input_len,
            start_ids,
            start_lengths,
        }
    }

    /// Whether the batch carries no prompt
    pub fn is_unconditional(&self) -> bool {
        self.max_input_len == 0
    }

    /// Number of sequences (`batch_size * beam_width`)
    pub fn num_sequences(&self) -> usize {
        self.batch_size * self.beam_width
    }

    /// Prompt plus generated tokens
    pub fn total_output_len(&self, request_output_len: usize) -> usize {
        self.max_input_len + request_output_len
    }

    /// Check that the host vectors match the declared shape
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.beam_width == 0 {
            return Err(LatticeError::invalid_parameter(format!(
                "batch_size ({}) and beam_width ({}) must be positive",
                self.batch_size, self.beam_width
            )));
        }
        let expected_ids = self.num_sequences() * self.max_input_len;
        if self.start_ids.len() != expected_ids {
            return Err(LatticeError::invalid_parameter(format!(
                "start_ids has {} entries, expected batch_size * beam_width * max_input_len = {}",
                self.start_ids.len(),
                expected_ids
            )));
        }
        let expected_lengths = if self.is_unconditional() {
            0
        } else {
            self.num_sequences()
        };
        if self.start_lengths.len() != expected_lengths {
            return Err(LatticeError::invalid_parameter(format!(
                "start_lengths has {} entries, expected {}",
                self.start_lengths.len(),
                expected_lengths
            )));
        }
        if let Some(len) = self
            .start_lengths
            .iter()
            .find(|&&len| len < 0 || len as usize > self.max_input_len)
        {
            return Err(LatticeError::invalid_parameter(format!(
                "start length {} outside [0, max_input_len = {}]",
                len, self.max_input_len
            )));
        }
        Ok(())
    }
}
