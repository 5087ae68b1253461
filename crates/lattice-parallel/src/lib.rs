//! Process topology and communicator groups for 2D model parallelism
//!
//! ```text
//!                  tensor axis (tensor_rank) ──▶
//!             ┌────────┬────────┬─────┬──────────┐
//!  pipeline   │   P0   │   P1   │ ... │  P(tp-1) │  ◀── tensor group, stage 0
//!  axis       ├────────┼────────┼─────┼──────────┤
//!  (pipeline  │  P(tp) │ P(tp+1)│ ... │ P(2tp-1) │  ◀── tensor group, stage 1
//!   _rank)    ├────────┼────────┼─────┼──────────┤
//!    │        │  ...   │        │     │          │
//!    ▼        └────────┴────────┴─────┴──────────┘
//!                 ▲
//!                 └── pipeline group of tensor_rank 0
//! ```
//!
//! - [`ProcessTopology`]: rank coordinates and partition invariants
//! - [`CartesianGrid`]: row-major non-periodic 2D grid
//! - [`CommunicatorGroupFormer`]: row/column sub-groups with one communicator each
//! - [`local`]: in-process backend where every rank is a tokio task

pub mod grid;
pub mod groups;
pub mod local;
pub mod topology;

pub use grid::CartesianGrid;
pub use groups::{CommunicatorGroup, CommunicatorGroupFormer, GroupKind, ParallelGroups};
pub use local::{LocalCollectiveBackend, LocalFabric, LocalProcessGroup, LocalWorld, RankHandles};
pub use topology::{ProcessTopology, RankCoordinates};
