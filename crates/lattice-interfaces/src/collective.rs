//! Process groups and collective communicators
//!
//! Two layers take part in forming the tensor/pipeline topology:
//!
//! - a host [`ProcessGroup`] that can synchronize, broadcast small payloads and
//!   split itself into sub-groups (the world group is the root of every split);
//! - a [`CollectiveBackend`] whose communicators are created by a symmetric join:
//!   every member calls [`CollectiveBackend::init_rank`] with the same unique id,
//!   the same group size and its own rank inside the group.

use async_trait::async_trait;
use lattice_types::{CommUniqueId, GlobalRank, LatticeError, Result};
use std::{fmt, sync::Arc};

/// Host-side group of ranks
#[async_trait]
pub trait ProcessGroup: Send + Sync + fmt::Debug {
    /// Rank of the caller inside this group
    fn rank(&self) -> usize;

    /// Number of ranks in this group
    fn size(&self) -> usize;

    /// World identity of the caller
    fn world_rank(&self) -> GlobalRank;

    /// World ranks of the members, ordered by rank inside this group
    fn members(&self) -> &[GlobalRank];

    /// Block until every member has reached the barrier
    async fn barrier(&self) -> Result<()>;

    /// Replace `data` on every member with the payload of `root`
    async fn broadcast(&self, data: &mut Vec<u8>, root: usize) -> Result<()>;

    /// Collect every member's payload, ordered by rank inside this group
    async fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Collective split: callers passing the same `color` form one new group,
    /// ordered by `key` (ties broken by rank in this group)
    async fn split(&self, color: usize, key: usize) -> Result<Arc<dyn ProcessGroup>>;

    /// Tear down the group so every blocked or later collective fails.
    ///
    /// Aborting any group aborts the whole world it was split from.
    fn abort(&self, reason: &str);

    /// Broadcast a single `u64` from `root`
    async fn broadcast_u64(&self, value: u64, root: usize) -> Result<u64> {
        let mut payload = value.to_le_bytes().to_vec();
        self.broadcast(&mut payload, root).await?;
        let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
            LatticeError::communication(format!(
                "u64 broadcast delivered {} bytes, expected 8",
                payload.len()
            ))
        })?;
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Factory of device collective communicators
#[async_trait]
pub trait CollectiveBackend: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Create a fresh id; called by the root of a group only
    fn generate_unique_id(&self) -> Result<CommUniqueId>;

    /// Join the communicator identified by `id`.
    ///
    /// Completes once all `nranks` members have joined with distinct ranks.
    async fn init_rank(
        &self,
        id: &CommUniqueId,
        nranks: usize,
        rank: usize,
    ) -> Result<Arc<dyn DeviceCommunicator>>;
}

/// Device collective communicator of one group.
///
/// Dropping the last handle destroys the communicator.
#[async_trait]
pub trait DeviceCommunicator: Send + Sync + fmt::Debug {
    /// Rank inside the communicator
    fn rank(&self) -> usize;

    /// Number of members
    fn size(&self) -> usize;

    /// Id the communicator was joined with
    fn unique_id(&self) -> &CommUniqueId;

    /// Collect every member's payload, ordered by rank
    async fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Replace `data` on every member with the payload of `root`
    async fn broadcast(&self, data: &mut Vec<u8>, root: usize) -> Result<()>;
}
