//! Reference decode engine
//!
//! Produces deterministic token streams without model weights while exercising
//! the same communication pattern a sharded decoder has at every step:
//!
//! - each tensor rank of the last pipeline stage scores its vocabulary shard;
//! - the shard winners are gathered over the tensor communicator and reduced
//!   to the global best token (ties go to the lower vocabulary id);
//! - the last stage broadcasts the chosen tokens over the pipeline communicator.
//!
//! Scores depend only on the seed, the sequence, the step, the previous token and
//! the global vocabulary id, so the output is the same for every `(tp, pp)` split
//! and for every pass over the same inputs.

use async_trait::async_trait;
use lattice_interfaces::{
    DecodeEngine, DecodeEngineFactory, DecodeInputs, DecodeOutputs, EngineContext, LayerRange,
    ModelShard,
};
use lattice_types::{LatticeError, NumericKind, Result, TokenId};
use parking_lot::Mutex;
use tracing::debug;

const WINNER_BYTES: usize = 8;

/// Candidate token of one sequence
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f32,
    token: TokenId,
}

impl Candidate {
    const NONE: Candidate = Candidate {
        score: f32::NEG_INFINITY,
        token: TokenId::MAX,
    };

    fn beats(&self, other: &Candidate) -> bool {
        self.score > other.score || (self.score == other.score && self.token < other.token)
    }
}

/// Per-engine scratch space, allocated on the first forward call
#[derive(Debug)]
struct Workspace {
    shard_winners: Vec<Candidate>,
}

/// Deterministic engine bound to one rank
pub struct SyntheticDecodeEngine {
    context: EngineContext,
    vocab_shard: LayerRange,
    workspace: Mutex<Option<Workspace>>,
}

impl SyntheticDecodeEngine {
    pub fn new(context: EngineContext) -> Result<Self> {
        let shard = &context.shard.config;
        if context.tensor_comm.size() != shard.tensor_size
            || context.tensor_comm.rank() != shard.tensor_rank
        {
            return Err(LatticeError::engine(format!(
                "tensor communicator rank {}/{} does not match shard tensor rank {}/{}",
                context.tensor_comm.rank(),
                context.tensor_comm.size(),
                shard.tensor_rank,
                shard.tensor_size
            )));
        }
        if context.pipeline_comm.size() != shard.pipeline_size
            || context.pipeline_comm.rank() != shard.pipeline_rank
        {
            return Err(LatticeError::engine(format!(
                "pipeline communicator rank {}/{} does not match shard pipeline rank {}/{}",
                context.pipeline_comm.rank(),
                context.pipeline_comm.size(),
                shard.pipeline_rank,
                shard.pipeline_size
            )));
        }

        let vocab_shard = shard.vocab_shard();
        debug!(
            "Synthetic engine: layers {:?}, vocab {:?}, {} heads, {}",
            shard.layer_range(),
            vocab_shard,
            shard.local_head_num(),
            context.shard.numeric_kind
        );
        Ok(Self {
            context,
            vocab_shard,
            workspace: Mutex::new(None),
        })
    }

    fn check_shapes(&self, outputs: &DecodeOutputs<'_>, inputs: &DecodeInputs<'_>) -> Result<()> {
        let num_sequences = inputs.num_sequences();
        let total = inputs.max_output_seq_len;
        let generated = inputs.request_output_len();
        let expected = [
            ("output_ids", outputs.output_ids.len(), num_sequences * total),
            ("parent_ids", outputs.parent_ids.len(), total * num_sequences),
            ("sequence_length", outputs.sequence_lengths.len(), num_sequences),
            ("output_log_probs", outputs.scores.len(), generated * num_sequences),
        ];
        for (name, actual, wanted) in expected {
            if actual != wanted {
                return Err(LatticeError::engine(format!(
                    "{} holds {} elements, expected {}",
                    name, actual, wanted
                )));
            }
        }
        if let (Some(ids), Some(lengths)) = (inputs.input_ids, inputs.input_lengths) {
            if ids.len() != num_sequences * inputs.max_input_len || lengths.len() != num_sequences {
                return Err(LatticeError::engine(format!(
                    "input_ids/input_lengths hold {}/{} elements for {} sequences of {}",
                    ids.len(),
                    lengths.len(),
                    num_sequences,
                    inputs.max_input_len
                )));
            }
        } else if inputs.input_ids.is_some() || inputs.input_lengths.is_some() {
            return Err(LatticeError::engine(
                "input_ids and input_lengths must be both present or both absent",
            ));
        }
        Ok(())
    }

    /// Best candidate of this rank's vocabulary shard for every sequence
    fn score_shard(&self, step: usize, previous: &[TokenId]) -> Vec<u8> {
        let mut guard = self.workspace.lock();
        let workspace = guard.get_or_insert_with(|| {
            debug!("Allocating decode workspace for {} sequences", previous.len());
            Workspace {
                shard_winners: Vec::with_capacity(previous.len()),
            }
        });

        workspace.shard_winners.clear();
        for (sequence, &token) in previous.iter().enumerate() {
            let mut best = Candidate::NONE;
            for vocab_id in self.vocab_shard.start..self.vocab_shard.end {
                let candidate = Candidate {
                    score: self.score(sequence, step, token, vocab_id),
                    token: vocab_id as TokenId,
                };
                if candidate.beats(&best) {
                    best = candidate;
                }
            }
            workspace.shard_winners.push(best);
        }

        encode_candidates(&workspace.shard_winners)
    }

    fn score(&self, sequence: usize, step: usize, previous: TokenId, vocab_id: usize) -> f32 {
        let mut h = self.context.random_seed;
        for part in [sequence as u64, step as u64, previous as u32 as u64, vocab_id as u64] {
            h = splitmix64(h ^ part);
        }
        // 24 bits keep the value exact in f32.
        (h >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Global token choice for this step, identical on every rank
    async fn next_tokens(&self, step: usize, previous: &[TokenId]) -> Result<Vec<Candidate>> {
        let shard = &self.context.shard.config;
        let mut chosen = Vec::new();

        if shard.is_last_stage() {
            let payload = self.score_shard(step, previous);
            let gathered = self.context.tensor_comm.all_gather(&payload).await?;
            let mut best = vec![Candidate::NONE; previous.len()];
            for shard_payload in &gathered {
                let winners = decode_candidates(shard_payload, previous.len())?;
                for (slot, winner) in best.iter_mut().zip(winners) {
                    if winner.beats(slot) {
                        *slot = winner;
                    }
                }
            }
            chosen = encode_candidates(&best);
        }

        self.context
            .pipeline_comm
            .broadcast(&mut chosen, shard.pipeline_size - 1)
            .await?;
        decode_candidates(&chosen, previous.len())
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn encode_candidates(candidates: &[Candidate]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(candidates.len() * WINNER_BYTES);
    for candidate in candidates {
        payload.extend_from_slice(&candidate.score.to_le_bytes());
        payload.extend_from_slice(&candidate.token.to_le_bytes());
    }
    payload
}

fn decode_candidates(payload: &[u8], count: usize) -> Result<Vec<Candidate>> {
    if payload.len() != count * WINNER_BYTES {
        return Err(LatticeError::communication(format!(
            "candidate payload of {} bytes, expected {}",
            payload.len(),
            count * WINNER_BYTES
        )));
    }
    Ok(payload
        .chunks_exact(WINNER_BYTES)
        .map(|chunk| {
            let mut score = [0u8; 4];
            let mut token = [0u8; 4];
            score.copy_from_slice(&chunk[..4]);
            token.copy_from_slice(&chunk[4..]);
            Candidate {
                score: f32::from_le_bytes(score),
                token: TokenId::from_le_bytes(token),
            }
        })
        .collect())
}

#[async_trait]
impl DecodeEngine for SyntheticDecodeEngine {
    fn numeric_kind(&self) -> NumericKind {
        self.context.shard.numeric_kind
    }

    async fn forward(
        &self,
        outputs: &mut DecodeOutputs<'_>,
        inputs: &DecodeInputs<'_>,
        shard: &ModelShard,
    ) -> Result<()> {
        if shard.config != self.context.shard.config {
            return Err(LatticeError::engine(
                "forward called with a shard this engine was not built for",
            ));
        }
        self.check_shapes(outputs, inputs)?;

        let num_sequences = inputs.num_sequences();
        let beam_width = inputs.beam_width;
        let total = inputs.max_output_seq_len;
        let prompt_len = inputs.max_input_len;
        let end_id = self.context.end_id;

        let output_ids = outputs.output_ids.as_mut_slice();
        let mut previous = vec![self.context.start_id; num_sequences];
        let mut finished = vec![false; num_sequences];
        let mut lengths = vec![prompt_len as i32; num_sequences];

        if let (Some(input_ids), Some(input_lengths)) = (inputs.input_ids, inputs.input_lengths) {
            let prompts = input_ids.as_slice();
            for (sequence, &length) in input_lengths.as_slice().iter().enumerate() {
                let row = &prompts[sequence * prompt_len..(sequence + 1) * prompt_len];
                output_ids[sequence * total..sequence * total + prompt_len].copy_from_slice(row);
                let length = (length.max(0) as usize).min(prompt_len);
                if length > 0 {
                    previous[sequence] = row[length - 1];
                }
                lengths[sequence] = length as i32;
            }
        }

        let scores = outputs.scores.as_mut_slice();
        for step in 0..inputs.request_output_len() {
            let chosen = self.next_tokens(step, &previous).await?;
            for (sequence, candidate) in chosen.iter().enumerate() {
                let position = sequence * total + prompt_len + step;
                if finished[sequence] {
                    output_ids[position] = end_id;
                    scores[step * num_sequences + sequence] = 0.0;
                    continue;
                }
                output_ids[position] = candidate.token;
                scores[step * num_sequences + sequence] = candidate.score.ln();
                previous[sequence] = candidate.token;
                lengths[sequence] += 1;
                if candidate.token == end_id {
                    finished[sequence] = true;
                }
            }
        }

        let parent_ids = outputs.parent_ids.as_mut_slice();
        for (index, parent) in parent_ids.iter_mut().enumerate() {
            *parent = ((index % num_sequences) % beam_width) as i32;
        }
        outputs
            .sequence_lengths
            .as_mut_slice()
            .copy_from_slice(&lengths);
        Ok(())
    }
}

/// Factory for [`SyntheticDecodeEngine`]
#[derive(Debug, Default, Clone)]
pub struct SyntheticEngineFactory;

impl DecodeEngineFactory for SyntheticEngineFactory {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn create(&self, context: EngineContext) -> Result<Box<dyn DecodeEngine>> {
        Ok(Box::new(SyntheticDecodeEngine::new(context)?))
    }
}
