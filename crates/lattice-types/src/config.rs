//! Configuration types for a generation run
//!
//! The layout mirrors the sectioned key/value file the launcher reads:
//! `[ft_instance_hyperparameter]`, one section named after the model, `[request]`
//! and an optional `[run]` section.

use crate::{LatticeError, NumericKind, Result, TokenId};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};

/// Start/end sentinel of the GPT-2 vocabulary
pub const GPT2_SENTINEL_TOKEN: TokenId = 50256;

/// Whole configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Instance hyperparameters (model choice, sampling, parallel sizes)
    pub ft_instance_hyperparameter: InstanceConfig,
    /// Request shape
    pub request: RequestConfig,
    /// Pass counts and output location
    #[serde(default)]
    pub run: RunConfig,
    /// Model architectures keyed by section name
    #[serde(flatten)]
    pub models: HashMap<String, ModelArchitecture>,
}

impl GenerationConfig {
    /// Architecture of the model selected by `model_name`
    pub fn model(&self) -> Result<&ModelArchitecture> {
        let name = &self.ft_instance_hyperparameter.model_name;
        self.models.get(name).ok_or_else(|| {
            LatticeError::config(format!("Missing model section [{}] for model_name", name))
        })
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.ft_instance_hyperparameter.validate()?;
        self.model()?.validate()?;
        self.request.validate()?;
        self.run.validate()?;

        let instance = &self.ft_instance_hyperparameter;
        if self.request.request_batch_size > instance.max_batch_size {
            return Err(LatticeError::config(format!(
                "request_batch_size ({}) should be <= max_batch_size ({})",
                self.request.request_batch_size, instance.max_batch_size
            )));
        }
        Ok(())
    }
}

/// `[ft_instance_hyperparameter]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Name of the model section to use
    pub model_name: String,
    /// Largest batch the instance accepts
    pub max_batch_size: usize,
    /// Longest sequence (prompt + generated tokens)
    pub max_seq_len: usize,
    /// Number of beams per request
    pub beam_width: usize,
    /// Top-k sampling (0 disables)
    pub top_k: usize,
    /// Nucleus sampling threshold (0 disables)
    pub top_p: f32,
    /// Sampling temperature
    pub temperature: f32,
    /// Repetition penalty
    pub repetition_penalty: f32,
    /// Beam search length penalty
    #[serde(default = "default_len_penalty")]
    pub len_penalty: f32,
    /// Beam search diversity rate
    #[serde(default)]
    pub beam_search_diversity_rate: f32,
    /// Directory holding the sharded weights
    pub model_dir: String,
    /// Tensor parallel size
    pub tensor_para_size: usize,
    /// Pipeline parallel size
    pub pipeline_para_size: usize,
    /// 0 = fp32, 1 = fp16
    #[serde(default)]
    pub is_half: i64,
    /// Fixed seed; generated on the coordinator when absent
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Start-of-sequence token
    #[serde(default = "default_sentinel")]
    pub start_id: TokenId,
    /// End-of-sequence token, also used as prompt padding
    #[serde(default = "default_sentinel")]
    pub end_id: TokenId,
}

fn default_len_penalty() -> f32 {
    1.0
}

fn default_sentinel() -> TokenId {
    GPT2_SENTINEL_TOKEN
}

impl InstanceConfig {
    /// Precision selected by `is_half`
    pub fn numeric_kind(&self) -> Result<NumericKind> {
        NumericKind::from_is_half(self.is_half)
    }

    /// Sampling knobs handed to the decode engine
    pub fn sampling(&self) -> SamplingSettings {
        SamplingSettings {
            beam_width: self.beam_width,
            top_k: self.top_k,
            top_p: self.top_p,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            len_penalty: self.len_penalty,
            beam_search_diversity_rate: self.beam_search_diversity_rate,
        }
    }

    /// World size implied by the parallel sizes
    pub fn expected_world_size(&self) -> Result<usize> {
        self.tensor_para_size
            .checked_mul(self.pipeline_para_size)
            .ok_or_else(|| {
                LatticeError::config(format!(
                    "tensor_para_size ({}) * pipeline_para_size ({}) overflows",
                    self.tensor_para_size, self.pipeline_para_size
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty() {
            return Err(LatticeError::config("model_name cannot be empty"));
        }
        if self.max_batch_size == 0 {
            return Err(LatticeError::config("max_batch_size cannot be 0"));
        }
        if self.max_seq_len == 0 {
            return Err(LatticeError::config("max_seq_len cannot be 0"));
        }
        if self.beam_width == 0 {
            return Err(LatticeError::config("beam_width cannot be 0"));
        }
        if self.tensor_para_size == 0 || self.pipeline_para_size == 0 {
            return Err(LatticeError::config(format!(
                "tensor_para_size ({}) and pipeline_para_size ({}) must be positive",
                self.tensor_para_size, self.pipeline_para_size
            )));
        }
        self.expected_world_size()?;
        self.numeric_kind()?;
        self.sampling().validate()
    }
}

/// Sampling and search settings; their numerical meaning belongs to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    pub beam_width: usize,
    pub top_k: usize,
    pub top_p: f32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub len_penalty: f32,
    pub beam_search_diversity_rate: f32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            beam_width: 1,
            top_k: 1,
            top_p: 0.0,
            temperature: 1.0,
            repetition_penalty: 1.0,
            len_penalty: 1.0,
            beam_search_diversity_rate: 0.0,
        }
    }
}

impl SamplingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.temperature < 0.0 {
            return Err(LatticeError::config(
                "temperature must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(LatticeError::config(format!(
                "top_p must be in range [0, 1], got {}",
                self.top_p
            )));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(LatticeError::config(
                "repetition_penalty must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Model section (`[gpt_124M]` and alike)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    pub head_num: usize,
    pub size_per_head: usize,
    pub vocab_size: usize,
    pub decoder_layers: usize,
}

impl ModelArchitecture {
    pub fn hidden_units(&self) -> usize {
        self.head_num * self.size_per_head
    }

    /// FFN inner size
    pub fn inter_size(&self) -> usize {
        4 * self.hidden_units()
    }

    pub fn validate(&self) -> Result<()> {
        if self.head_num == 0 || self.size_per_head == 0 {
            return Err(LatticeError::config(format!(
                "head_num ({}) and size_per_head ({}) must be positive",
                self.head_num, self.size_per_head
            )));
        }
        if self.vocab_size == 0 {
            return Err(LatticeError::config("vocab_size cannot be 0"));
        }
        if self.decoder_layers == 0 {
            return Err(LatticeError::config("decoder_layers cannot be 0"));
        }
        Ok(())
    }
}

/// `[request]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub request_batch_size: usize,
    /// Number of tokens to generate after the prompt
    pub request_output_len: usize,
    /// Start-id file; resolved against the config file directory when relative
    #[serde(default)]
    pub start_ids_file: Option<PathBuf>,
}

impl RequestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_batch_size == 0 {
            return Err(LatticeError::config("request_batch_size cannot be 0"));
        }
        if self.request_output_len == 0 {
            return Err(LatticeError::config("request_output_len cannot be 0"));
        }
        Ok(())
    }
}

/// `[run]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_iterations")]
    pub warmup_iterations: usize,
    #[serde(default = "default_iterations")]
    pub measured_iterations: usize,
    /// Result matrix written by the coordinator
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
}

fn default_iterations() -> usize {
    1
}

fn default_output_file() -> PathBuf {
    PathBuf::from("out")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: default_iterations(),
            measured_iterations: default_iterations(),
            output_file: default_output_file(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.warmup_iterations == 0 || self.measured_iterations == 0 {
            return Err(LatticeError::config(format!(
                "warmup_iterations ({}) and measured_iterations ({}) must be positive",
                self.warmup_iterations, self.measured_iterations
            )));
        }
        Ok(())
    }
}
