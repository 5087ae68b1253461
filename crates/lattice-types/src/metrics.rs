//! Reports produced by a generation run

use crate::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Timing of the measured pass, computed on the coordinator only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    pub run_id: RunId,
    pub request_batch_size: usize,
    pub beam_width: usize,
    pub head_num: usize,
    pub size_per_head: usize,
    pub total_output_len: usize,
    pub decoder_layers: usize,
    pub vocab_size: usize,
    pub tensor_para_size: usize,
    pub pipeline_para_size: usize,
    /// Forward calls inside the measured region
    pub iterations: usize,
    /// Wall-clock time between the two measured-region barriers
    pub total_time: Duration,
    pub measured_at: DateTime<Utc>,
}

impl LatencyReport {
    /// Mean latency per forward call in milliseconds
    pub fn mean_latency_ms(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.total_time.as_secs_f64() * 1000.0 / self.iterations as f64
    }

    /// Generated (prompt included) tokens per second across the batch
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        let tokens =
            self.request_batch_size * self.beam_width * self.total_output_len * self.iterations;
        tokens as f64 / secs
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request_batch_size {} beam_width {} head_num {} size_per_head {} total_output_len {} \
             decoder_layers {} vocab_size {} decoding-time {:.2} ms",
            self.request_batch_size,
            self.beam_width,
            self.head_num,
            self.size_per_head,
            self.total_output_len,
            self.decoder_layers,
            self.vocab_size,
            self.mean_latency_ms()
        )
    }
}

/// Device memory usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes currently allocated
    pub used_bytes: usize,
    /// High-water mark
    pub peak_bytes: usize,
    /// Live allocations
    pub active_allocations: usize,
    /// Device capacity, when known
    pub total_bytes: Option<usize>,
}

impl MemoryUsage {
    /// Utilization percentage, 0 when the capacity is unknown
    pub fn utilization_percent(&self) -> f32 {
        match self.total_bytes {
            Some(total) if total > 0 => (self.used_bytes as f32 / total as f32) * 100.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mib = |bytes: usize| bytes as f64 / (1024.0 * 1024.0);
        write!(
            f,
            "used {:.2} MiB, peak {:.2} MiB, {} live allocation(s)",
            mib(self.used_bytes),
            mib(self.peak_bytes),
            self.active_allocations
        )
    }
}
