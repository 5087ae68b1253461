//! In-process collective backend
//!
//! Every rank is a tokio task inside one process. Ranks exchange data through
//! shared rendezvous slots guarded by `parking_lot` locks and synchronize on
//! `tokio::sync::Barrier`s: the writer fills its slot, everyone waits, readers
//! copy out, everyone waits again before the slots can be reused.
//!
//! All groups split from one world share a single abort signal. Aborting any of
//! them wakes every rank blocked in a collective with a communication error, so
//! a failed rank never leaves its peers hanging.

use async_trait::async_trait;
use lattice_interfaces::{CollectiveBackend, DeviceCommunicator, ProcessGroup};
use lattice_types::{CommUniqueId, GlobalRank, LatticeError, Result};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{watch, Barrier};
use tracing::{debug, error, info, warn};

/// Synchronization point shared by the members of one group
struct Rendezvous {
    uid: u64,
    size: usize,
    barrier: Barrier,
    slots: RwLock<Vec<Option<Vec<u8>>>>,
    abort: watch::Receiver<Option<String>>,
}

impl Rendezvous {
    fn new(uid: u64, size: usize, abort: watch::Receiver<Option<String>>) -> Self {
        Self {
            uid,
            size,
            barrier: Barrier::new(size),
            slots: RwLock::new(vec![None; size]),
            abort,
        }
    }

    /// Barrier wait that fails once the world is aborted
    async fn wait(&self) -> Result<()> {
        let mut abort = self.abort.clone();
        let current = abort.borrow().clone();
        if let Some(reason) = current {
            return Err(aborted(&reason));
        }
        tokio::select! {
            _ = self.barrier.wait() => Ok(()),
            reason = abort_signal(&mut abort) => Err(aborted(&reason)),
        }
    }

    async fn broadcast(&self, rank: usize, data: &mut Vec<u8>, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(LatticeError::invalid_parameter(format!(
                "broadcast root {} outside group of {}",
                root, self.size
            )));
        }
        if rank == root {
            self.slots.write()[root] = Some(data.clone());
        }
        self.wait().await?;
        if rank != root {
            let payload = self.slots.read()[root].clone();
            *data = payload.ok_or_else(|| {
                LatticeError::communication(format!(
                    "group {} broadcast from root {} delivered no payload",
                    self.uid, root
                ))
            })?;
        }
        self.wait().await?;
        if rank == root {
            self.slots.write()[root] = None;
        }
        Ok(())
    }

    async fn all_gather(&self, rank: usize, local: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.slots.write()[rank] = Some(local.to_vec());
        self.wait().await?;
        let gathered: Option<Vec<Vec<u8>>> = self.slots.read().iter().cloned().collect();
        self.wait().await?;
        self.slots.write()[rank] = None;
        gathered.ok_or_else(|| {
            LatticeError::communication(format!(
                "group {} all-gather is missing a member payload",
                self.uid
            ))
        })
    }
}

async fn abort_signal(abort: &mut watch::Receiver<Option<String>>) -> String {
    let reason = match abort.wait_for(Option::is_some).await {
        Ok(reason) => Some(reason.clone().unwrap_or_default()),
        Err(_) => None,
    };
    match reason {
        Some(reason) => reason,
        // The fabric outlives every rank, so a closed channel only happens at teardown.
        None => std::future::pending().await,
    }
}

fn aborted(reason: &str) -> LatticeError {
    LatticeError::communication(format!("process group aborted: {}", reason))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SplitKey {
    parent: u64,
    epoch: u64,
    color: usize,
}

struct PendingCommunicator {
    nranks: usize,
    joined: Vec<bool>,
    remaining: usize,
    rendezvous: Arc<Rendezvous>,
}

/// Shared state of one in-process world
pub struct LocalFabric {
    world_size: usize,
    abort_tx: watch::Sender<Option<String>>,
    world: Arc<Rendezvous>,
    splits: Mutex<HashMap<SplitKey, Arc<Rendezvous>>>,
    pending_communicators: Mutex<HashMap<CommUniqueId, PendingCommunicator>>,
    next_uid: AtomicU64,
}

impl LocalFabric {
    pub fn new(world_size: usize) -> Result<Arc<Self>> {
        if world_size == 0 {
            return Err(LatticeError::invalid_parameter(
                "world_size must be positive",
            ));
        }
        let (abort_tx, abort_rx) = watch::channel(None);
        Ok(Arc::new(Self {
            world_size,
            world: Arc::new(Rendezvous::new(0, world_size, abort_rx)),
            abort_tx,
            splits: Mutex::new(HashMap::new()),
            pending_communicators: Mutex::new(HashMap::new()),
            next_uid: AtomicU64::new(1),
        }))
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// World group handle of `rank`
    pub fn world_group(self: &Arc<Self>, rank: GlobalRank) -> Result<Arc<dyn ProcessGroup>> {
        if rank.get() >= self.world_size {
            return Err(LatticeError::invalid_parameter(format!(
                "rank {} outside world of {} ranks",
                rank, self.world_size
            )));
        }
        Ok(Arc::new(LocalProcessGroup {
            fabric: self.clone(),
            rendezvous: self.world.clone(),
            rank: rank.get(),
            world_rank: rank,
            members: (0..self.world_size).map(GlobalRank::new).collect(),
            split_epoch: AtomicU64::new(0),
        }))
    }

    /// Communicator factory bound to this world
    pub fn collective_backend(self: &Arc<Self>) -> Arc<dyn CollectiveBackend> {
        Arc::new(LocalCollectiveBackend {
            fabric: self.clone(),
        })
    }

    /// Abort the world; the first reason wins
    pub fn abort(&self, reason: &str) {
        let first = self.abort_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.to_string());
                true
            } else {
                false
            }
        });
        if first {
            error!("Aborting local world of {} ranks: {}", self.world_size, reason);
        }
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_tx.borrow().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_tx.borrow().is_some()
    }

    fn fresh_rendezvous(&self, size: usize) -> Arc<Rendezvous> {
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        Arc::new(Rendezvous::new(uid, size, self.abort_tx.subscribe()))
    }

    fn split_rendezvous(&self, key: SplitKey, size: usize) -> Arc<Rendezvous> {
        let mut splits = self.splits.lock();
        splits
            .entry(key)
            .or_insert_with(|| self.fresh_rendezvous(size))
            .clone()
    }
}

impl fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFabric")
            .field("world_size", &self.world_size)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Host group of one rank inside a [`LocalFabric`]
pub struct LocalProcessGroup {
    fabric: Arc<LocalFabric>,
    rendezvous: Arc<Rendezvous>,
    rank: usize,
    world_rank: GlobalRank,
    members: Vec<GlobalRank>,
    split_epoch: AtomicU64,
}

impl fmt::Debug for LocalProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProcessGroup")
            .field("uid", &self.rendezvous.uid)
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .field("world_rank", &self.world_rank)
            .finish()
    }
}

#[async_trait]
impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn world_rank(&self) -> GlobalRank {
        self.world_rank
    }

    fn members(&self) -> &[GlobalRank] {
        &self.members
    }

    async fn barrier(&self) -> Result<()> {
        self.rendezvous.wait().await
    }

    async fn broadcast(&self, data: &mut Vec<u8>, root: usize) -> Result<()> {
        self.rendezvous.broadcast(self.rank, data, root).await
    }

    async fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.rendezvous.all_gather(self.rank, local).await
    }

    async fn split(&self, color: usize, key: usize) -> Result<Arc<dyn ProcessGroup>> {
        // Members split in the same order, so their epochs agree.
        let epoch = self.split_epoch.fetch_add(1, Ordering::SeqCst);

        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&(color as u64).to_le_bytes());
        payload.extend_from_slice(&(key as u64).to_le_bytes());
        let gathered = self.all_gather(&payload).await?;

        let mut peers = Vec::new();
        for (parent_rank, entry) in gathered.iter().enumerate() {
            let (peer_color, peer_key) = decode_color_key(entry)?;
            if peer_color == color as u64 {
                peers.push((peer_key, parent_rank));
            }
        }
        peers.sort_unstable();

        let rank = peers
            .iter()
            .position(|&(_, parent_rank)| parent_rank == self.rank)
            .ok_or_else(|| {
                LatticeError::internal(format!(
                    "rank {} missing from its own split color {}",
                    self.rank, color
                ))
            })?;
        let members: Vec<GlobalRank> = peers
            .iter()
            .map(|&(_, parent_rank)| self.members[parent_rank])
            .collect();

        let rendezvous = self.fabric.split_rendezvous(
            SplitKey {
                parent: self.rendezvous.uid,
                epoch,
                color,
            },
            members.len(),
        );
        debug!(
            "{} split group {} color {} into group {} as rank {}/{}",
            self.world_rank,
            self.rendezvous.uid,
            color,
            rendezvous.uid,
            rank,
            members.len()
        );

        Ok(Arc::new(LocalProcessGroup {
            fabric: self.fabric.clone(),
            rendezvous,
            rank,
            world_rank: self.world_rank,
            members,
            split_epoch: AtomicU64::new(0),
        }))
    }

    fn abort(&self, reason: &str) {
        self.fabric.abort(&format!("{} ({})", reason, self.world_rank));
    }
}

fn decode_color_key(entry: &[u8]) -> Result<(u64, u64)> {
    if entry.len() != 16 {
        return Err(LatticeError::communication(format!(
            "split payload of {} bytes, expected 16",
            entry.len()
        )));
    }
    let mut color = [0u8; 8];
    let mut key = [0u8; 8];
    color.copy_from_slice(&entry[..8]);
    key.copy_from_slice(&entry[8..]);
    Ok((u64::from_le_bytes(color), u64::from_le_bytes(key)))
}

/// Communicator factory of a [`LocalFabric`]
#[derive(Debug)]
pub struct LocalCollectiveBackend {
    fabric: Arc<LocalFabric>,
}

#[async_trait]
impl CollectiveBackend for LocalCollectiveBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn generate_unique_id(&self) -> Result<CommUniqueId> {
        Ok(CommUniqueId::random())
    }

    async fn init_rank(
        &self,
        id: &CommUniqueId,
        nranks: usize,
        rank: usize,
    ) -> Result<Arc<dyn DeviceCommunicator>> {
        if rank >= nranks {
            return Err(LatticeError::invalid_parameter(format!(
                "communicator rank {} outside group of {}",
                rank, nranks
            )));
        }

        let rendezvous = {
            let mut pending = self.fabric.pending_communicators.lock();
            let entry = pending.entry(id.clone()).or_insert_with(|| PendingCommunicator {
                nranks,
                joined: vec![false; nranks],
                remaining: nranks,
                rendezvous: self.fabric.fresh_rendezvous(nranks),
            });
            if entry.nranks != nranks {
                return Err(LatticeError::communication(format!(
                    "communicator {} joined with nranks {} but was created with {}",
                    id, nranks, entry.nranks
                )));
            }
            if entry.joined[rank] {
                return Err(LatticeError::communication(format!(
                    "communicator {} rank {} joined twice",
                    id, rank
                )));
            }
            entry.joined[rank] = true;
            entry.remaining -= 1;
            let rendezvous = entry.rendezvous.clone();
            if entry.remaining == 0 {
                pending.remove(id);
            }
            rendezvous
        };

        // Handshake completes once every member has joined.
        rendezvous.wait().await?;
        debug!("Joined communicator {} as rank {}/{}", id, rank, nranks);

        Ok(Arc::new(LocalCommunicator {
            id: id.clone(),
            rank,
            size: nranks,
            rendezvous,
        }))
    }
}

/// Collective communicator of one group
pub struct LocalCommunicator {
    id: CommUniqueId,
    rank: usize,
    size: usize,
    rendezvous: Arc<Rendezvous>,
}

impl fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("id", &format_args!("{}", self.id))
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl DeviceCommunicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn unique_id(&self) -> &CommUniqueId {
        &self.id
    }

    async fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.rendezvous.all_gather(self.rank, local).await
    }

    async fn broadcast(&self, data: &mut Vec<u8>, root: usize) -> Result<()> {
        self.rendezvous.broadcast(self.rank, data, root).await
    }
}

impl Drop for LocalCommunicator {
    fn drop(&mut self) {
        debug!("Destroying communicator {} rank {}", self.id, self.rank);
    }
}

/// Handles a rank task starts from
#[derive(Clone)]
pub struct RankHandles {
    pub rank: GlobalRank,
    pub world: Arc<dyn ProcessGroup>,
    pub backend: Arc<dyn CollectiveBackend>,
}

/// Aborts the world when a rank task is dropped before finishing.
///
/// Tokio drops the future of a panicked task right away, so peers are released
/// without waiting for the launcher to join that task.
struct AbortUnlessFinished {
    fabric: Arc<LocalFabric>,
    rank: GlobalRank,
    finished: bool,
}

impl Drop for AbortUnlessFinished {
    fn drop(&mut self) {
        if !self.finished {
            self.fabric
                .abort(&format!("{} panicked or was cancelled", self.rank));
        }
    }
}

/// Launcher running one tokio task per rank
#[derive(Debug, Clone)]
pub struct LocalWorld {
    fabric: Arc<LocalFabric>,
}

impl LocalWorld {
    pub fn new(world_size: usize) -> Result<Self> {
        Ok(Self {
            fabric: LocalFabric::new(world_size)?,
        })
    }

    pub fn world_size(&self) -> usize {
        self.fabric.world_size()
    }

    pub fn fabric(&self) -> &Arc<LocalFabric> {
        &self.fabric
    }

    /// Run `rank_main` on every rank and collect the results in rank order.
    ///
    /// A rank that fails or panics aborts the world, releasing its peers.
    pub async fn run<F, Fut, T>(&self, rank_main: F) -> Result<Vec<Result<T>>>
    where
        F: Fn(RankHandles) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        info!("Launching {} local ranks", self.world_size());
        let backend = self.fabric.collective_backend();

        let mut tasks = Vec::with_capacity(self.world_size());
        for rank in 0..self.world_size() {
            let rank = GlobalRank::new(rank);
            let handles = RankHandles {
                rank,
                world: self.fabric.world_group(rank)?,
                backend: backend.clone(),
            };
            let mut guard = AbortUnlessFinished {
                fabric: self.fabric.clone(),
                rank,
                finished: false,
            };
            let rank_future = rank_main(handles);
            tasks.push(tokio::spawn(async move {
                let result = rank_future.await;
                guard.finished = true;
                if let Err(e) = &result {
                    guard.fabric.abort(&format!("{} failed: {}", rank, e));
                }
                result
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (rank, task) in tasks.into_iter().enumerate() {
            let result = match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    self.fabric
                        .abort(&format!("P{} panicked: {}", rank, join_error));
                    Err(LatticeError::internal(format!(
                        "rank P{} task failed: {}",
                        rank, join_error
                    )))
                }
            };
            if let Err(e) = &result {
                warn!("P{} finished with error: {}", rank, e);
            }
            results.push(result);
        }
        Ok(results)
    }
}
