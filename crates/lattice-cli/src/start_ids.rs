//! Start-id file reading
//!
//! One prompt per line, token ids separated by commas. A missing file means
//! unconditional generation.

use lattice_types::{LatticeError, RequestBatch, Result, TokenId};
use std::{io::ErrorKind, path::Path};
use tracing::{info, warn};

/// Parse start-id rows; blank lines are skipped
pub fn parse_start_ids(content: &str) -> Result<Vec<Vec<TokenId>>> {
    let mut rows = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut row = Vec::new();
        for field in line.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let id = field.parse::<TokenId>().map_err(|e| {
                LatticeError::config(format!(
                    "start ids line {}: invalid token id '{}': {}",
                    line_no + 1,
                    field,
                    e
                ))
            })?;
            row.push(id);
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Read the start-id file at `path` and build the request batch
pub async fn read_start_ids(
    path: &Path,
    batch_size: usize,
    beam_width: usize,
    end_id: TokenId,
) -> Result<RequestBatch> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "Start ids file {} not found, running unconditional generation",
                path.display()
            );
            return Ok(RequestBatch::unconditional(batch_size, beam_width));
        }
        Err(e) => {
            return Err(LatticeError::config(format!(
                "Cannot read start ids file {}: {}",
                path.display(),
                e
            )))
        }
    };

    let rows = parse_start_ids(&content)?;
    if rows.len() > batch_size {
        warn!(
            "{} holds {} prompts, only the first {} are used",
            path.display(),
            rows.len(),
            batch_size
        );
    }
    let batch = RequestBatch::from_sequences(&rows, batch_size, beam_width, end_id);
    info!(
        "Read {} prompt(s) from {}, max input length {}",
        rows.len().min(batch_size),
        path.display(),
        batch.max_input_len
    );
    Ok(batch)
}
