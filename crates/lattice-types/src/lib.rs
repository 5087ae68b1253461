//! Core type definitions for the Lattice generation coordinator
//!
//! This crate holds the identifiers, device tags, configuration sections, request
//! shapes, reports and the error type shared by every other Lattice crate. It stays
//! free of async runtime and backend dependencies so the rest of the workspace can
//! depend on it without cycles.

pub mod config;
pub mod devices;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod requests;

pub use config::*;
pub use devices::*;
pub use errors::*;
pub use ids::*;
pub use metrics::*;
pub use requests::*;

/// Result type used throughout Lattice
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Token id type used by every generation buffer (device `int32`)
pub type TokenId = i32;
