//! Result collection on the coordinator
//!
//! The output ids matrix is written as text: one line per `(batch, beam)`
//! sequence in output order, `total_output_len` space-separated ids per line.
//! Persisting the matrix is best effort; a write failure is only a warning.

use lattice_interfaces::DeviceContext;
use lattice_parallel::ProcessTopology;
use lattice_runtime::GenerationBuffers;
use lattice_types::{LatticeError, Result, TokenId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Ids printed in the log preview
const PREVIEW_LEN: usize = 10;

/// Output of a collection on the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedOutput {
    /// `[batch * beam, total_output_len]` row-major
    pub output_ids: Vec<TokenId>,
    pub rows: usize,
    pub columns: usize,
    /// Number of ids equal to 0
    pub zero_count: usize,
    pub path: PathBuf,
    /// Whether the matrix reached `path`
    pub written: bool,
}

impl CollectedOutput {
    /// Ids of one sequence
    pub fn row(&self, index: usize) -> Option<&[TokenId]> {
        let start = index.checked_mul(self.columns)?;
        self.output_ids.get(start..start + self.columns)
    }
}

/// Gathers output ids back to host memory and writes the result file
#[derive(Debug, Clone)]
pub struct ResultCollector {
    output_path: PathBuf,
}

impl ResultCollector {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    /// Collect on the coordinator; every other rank returns `None`
    pub async fn collect(
        &self,
        topology: &ProcessTopology,
        device: &dyn DeviceContext,
        buffers: &GenerationBuffers,
    ) -> Result<Option<CollectedOutput>> {
        if !topology.is_coordinator() {
            debug!("{} skips result collection", topology.rank());
            return Ok(None);
        }

        let output_ids = buffers.output_ids_host(device).await?;
        let columns = buffers.total_output_len();
        let rows = buffers.num_sequences();
        let zero_count = output_ids.iter().filter(|&&id| id == 0).count();

        let preview: Vec<String> = output_ids
            .iter()
            .take(PREVIEW_LEN)
            .map(ToString::to_string)
            .collect();
        info!(
            "Writing {} elements to {}, first ids: {}",
            output_ids.len(),
            self.output_path.display(),
            preview.join(" ")
        );
        info!("zero count = {}", zero_count);

        let contents = format_matrix(&output_ids, columns);
        let written = match tokio::fs::write(&self.output_path, contents).await {
            Ok(()) => true,
            Err(e) => {
                let error = LatticeError::from(e);
                if error.is_fatal() {
                    return Err(error);
                }
                warn!(
                    "Cannot write results into output file {}: {}",
                    self.output_path.display(),
                    error
                );
                false
            }
        };

        Ok(Some(CollectedOutput {
            output_ids,
            rows,
            columns,
            zero_count,
            path: self.output_path.clone(),
            written,
        }))
    }
}

/// One line per row of `columns` ids, space-separated
pub fn format_matrix(ids: &[TokenId], columns: usize) -> String {
    if columns == 0 {
        return String::new();
    }
    let mut out = String::with_capacity(ids.len() * 6);
    for row in ids.chunks(columns) {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_rows_follow_columns() {
        assert_eq!(format_matrix(&[1, 2, 3, 4, 5, 6], 3), "1 2 3\n4 5 6\n");
        assert_eq!(format_matrix(&[], 3), "");
        assert_eq!(format_matrix(&[7], 0), "");
    }
}
