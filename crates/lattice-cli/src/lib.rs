//! # Lattice CLI
//!
//! Launches a tensor/pipeline parallel generation run with every rank in-process.
//!
//! ```text
//! lattice [CONFIG] [--world-size N] [--devices N] [--start-ids FILE] [--output FILE]
//! ```
//!
//! Exit codes: `-1` for configuration or invariant violations, `1` for any other
//! fatal error, `0` on success.

pub mod config;
pub mod output;
pub mod start_ids;
pub mod utils;

pub use config::{load_config, resolve_start_ids_path, DEFAULT_CONFIG_PATH};
pub use start_ids::{parse_start_ids, read_start_ids};
