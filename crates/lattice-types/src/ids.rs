//! Identifier types for Lattice entities

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a rank in the world group.
///
/// Ranks are contiguous in `[0, world_size)`; rank 0 is the coordinator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GlobalRank(pub usize);

impl GlobalRank {
    pub const COORDINATOR: GlobalRank = GlobalRank(0);

    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this rank times the measured pass and writes results
    pub fn is_coordinator(self) -> bool {
        self == Self::COORDINATOR
    }
}

impl From<usize> for GlobalRank {
    fn from(value: usize) -> Self {
        GlobalRank(value)
    }
}

impl fmt::Display for GlobalRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Run identifier attached to reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size in bytes of a collective communicator unique id
pub const COMM_UNIQUE_ID_BYTES: usize = 128;

/// Opaque identifier shared by every member joining one collective communicator.
///
/// Generated by the group's local root and broadcast to the other members before
/// they join.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CommUniqueId([u8; COMM_UNIQUE_ID_BYTES]);

impl CommUniqueId {
    /// Generate a fresh random id
    pub fn random() -> Self {
        let mut bytes = [0u8; COMM_UNIQUE_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild an id received over a host broadcast
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let array: [u8; COMM_UNIQUE_ID_BYTES] = bytes.try_into().ok()?;
        Some(Self(array))
    }

}

/// Bytes of the id shown in logs
const COMM_UNIQUE_ID_PREFIX: usize = 6;

impl fmt::Debug for CommUniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommUniqueId({}..)", self)
    }
}

/// Hex of the first bytes, enough to tell communicators apart in logs
impl fmt::Display for CommUniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..COMM_UNIQUE_ID_PREFIX] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
