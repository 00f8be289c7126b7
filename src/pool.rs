//! Fixed-capacity pool of reusable task metadata blocks.
//!
//! Every task flows through a [`TaskBlock`] checked out from a
//! [`MetadataPool`]. The pool keeps an explicit free-list; at any moment the
//! free indices and the checked-out indices partition `[0, capacity)`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::fatal::{self, Fatal};

/// Reference pool size.
pub const DEFAULT_CAPACITY: usize = 32;

/// Bytes of payload carried by every block. Large enough for a 16k-point
/// interleaved FFT frame or a maximum-size Viterbi task.
pub const PAYLOAD_CAPACITY: usize = 128 * 1024;

/// Index of a block in the pool's backing array.
pub type BlockId = usize;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every block is checked out. Callers retry or drop work.
    #[error("no free metadata blocks ({capacity} in use)")]
    Exhausted { capacity: usize },

    /// A release that would break the free/checked-out partition.
    #[error("corrupted release of block {id}: {free} of {capacity} blocks already free")]
    Corrupted {
        id: BlockId,
        free: usize,
        capacity: usize,
    },
}

impl Fatal for PoolError {
    fn exit_code(&self) -> i32 {
        fatal::POOL_CORRUPTED_EXIT
    }
}

/// Lifecycle of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum TaskStatus {
    Free = 0,
    Allocated = 1,
    Queued = 2,
    Running = 3,
    Done = 4,
}

impl TaskStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TaskStatus::Allocated,
            2 => TaskStatus::Queued,
            3 => TaskStatus::Running,
            4 => TaskStatus::Done,
            _ => TaskStatus::Free,
        }
    }
}

/// What a block's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Fft,
    Viterbi,
    Unknown,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Fft => write!(f, "fft"),
            JobType::Viterbi => write!(f, "viterbi"),
            JobType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One pooled task slot. The payload is reinterpreted according to
/// `job_type` by the dispatch layer.
#[derive(Debug)]
pub struct TaskBlock {
    id: BlockId,
    pub job_type: JobType,
    /// QoS hint; not interpreted by the placement policy.
    pub criticality_level: i32,
    /// Bytes of `payload` actually in use.
    pub data_size: usize,
    payload: Box<[u8]>,
}

impl TaskBlock {
    fn new(id: BlockId, payload_bytes: usize) -> Self {
        Self {
            id,
            job_type: JobType::Unknown,
            criticality_level: 0,
            data_size: 0,
            payload: vec![0u8; payload_bytes].into_boxed_slice(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    // Payload bytes are left as they are.
    fn reset(&mut self) {
        self.job_type = JobType::Unknown;
        self.criticality_level = 0;
        self.data_size = 0;
    }
}

/// Renders a block's metadata the way fatal dumps print it.
pub struct BlockDump<'a> {
    status: TaskStatus,
    block: &'a TaskBlock,
}

impl fmt::Display for BlockDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} status={:?} job_type={} criticality_level={} data_size={}",
            self.block.id,
            self.status,
            self.block.job_type,
            self.block.criticality_level,
            self.block.data_size
        )
    }
}

struct Slot {
    status: AtomicU8,
    block: Mutex<TaskBlock>,
}

impl Slot {
    fn status(&self) -> TaskStatus {
        TaskStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, TaskBlock> {
        self.block.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of task blocks plus the free-list that hands them out.
pub struct MetadataPool {
    slots: Box<[Slot]>,
    free: Mutex<Vec<BlockId>>,
}

impl MetadataPool {
    /// Pool of `capacity` blocks with the default payload size.
    pub fn new(capacity: usize) -> Self {
        Self::with_payload_capacity(capacity, PAYLOAD_CAPACITY)
    }

    pub fn with_payload_capacity(capacity: usize, payload_bytes: usize) -> Self {
        let slots = (0..capacity)
            .map(|id| Slot {
                status: AtomicU8::new(TaskStatus::Free as u8),
                block: Mutex::new(TaskBlock::new(id, payload_bytes)),
            })
            .collect();
        debug!(capacity, payload_bytes, "metadata pool created");
        Self {
            slots,
            free: Mutex::new((0..capacity).collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list().len()
    }

    /// Snapshot of the free-list, bottom first.
    pub fn free_ids(&self) -> Vec<BlockId> {
        self.free_list().clone()
    }

    /// Check out a block. The block returns to the pool when the
    /// [`BlockRef`] is dropped.
    pub fn allocate(&self) -> Result<BlockRef<'_>, PoolError> {
        let mut free = self.free_list();
        let id = free.pop().ok_or(PoolError::Exhausted {
            capacity: self.capacity(),
        })?;
        let slot = &self.slots[id];
        slot.lock().reset();
        slot.set_status(TaskStatus::Allocated);
        debug!(block = id, free = free.len(), "block allocated");
        Ok(BlockRef { pool: self, id })
    }

    /// Return `id` to the free-list, terminating the process if doing so
    /// would corrupt the pool.
    pub fn release_id(&self, id: BlockId) {
        if let Err(e) = self.try_release_id(id) {
            fatal::terminate(&e);
        }
    }

    /// Return `id` to the free-list. A release when every block is already
    /// free, a release of a block that is not checked out, or an id outside
    /// the pool is reported as [`PoolError::Corrupted`] after the pool state
    /// has been logged.
    pub fn try_release_id(&self, id: BlockId) -> Result<(), PoolError> {
        let mut free = self.free_list();
        let capacity = self.capacity();
        let checked_out = self
            .slots
            .get(id)
            .is_some_and(|slot| slot.status() != TaskStatus::Free);

        if free.len() >= capacity || !checked_out {
            self.dump(&free, id);
            return Err(PoolError::Corrupted {
                id,
                free: free.len(),
                capacity,
            });
        }

        free.push(id);
        let slot = &self.slots[id];
        slot.lock().reset();
        slot.set_status(TaskStatus::Free);
        debug!(block = id, free = free.len(), "block released");
        Ok(())
    }

    /// Status of block `id`, or `None` for an id outside the pool.
    pub fn get_status(&self, id: BlockId) -> Option<TaskStatus> {
        self.slots.get(id).map(Slot::status)
    }

    /// Read block `id` under its lock.
    ///
    /// Blocks while another caller holds the same block's lock.
    pub fn inspect<R>(&self, id: BlockId, f: impl FnOnce(&TaskBlock) -> R) -> Option<R> {
        self.slots.get(id).map(|slot| f(&slot.lock()))
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<BlockId>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dump(&self, free: &[BlockId], id: BlockId) {
        error!(
            block = id,
            free = free.len(),
            capacity = self.capacity(),
            "releasing a metadata block that is not checked out"
        );
        for (i, bi) in free.iter().enumerate() {
            error!("  free[{:2}] = {}", i, bi);
        }
        match self.slots.get(id) {
            // The caller may still hold this block's lock; never wait on it here.
            Some(slot) => match slot.block.try_lock() {
                Ok(block) => error!(
                    "  being freed: {}",
                    BlockDump {
                        status: slot.status(),
                        block: &block
                    }
                ),
                Err(_) => error!("  being freed: block {} (locked)", id),
            },
            None => error!("  being freed: block {} is outside the pool", id),
        }
    }
}

/// Exclusive handle to a checked-out block. Dropping it releases the block.
pub struct BlockRef<'p> {
    pool: &'p MetadataPool,
    id: BlockId,
}

impl BlockRef<'_> {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.pool.slots[self.id].status()
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.pool.slots[self.id].set_status(status);
    }

    /// Lock the block for reading or populating its fields and payload.
    pub fn lock(&mut self) -> MutexGuard<'_, TaskBlock> {
        self.pool.slots[self.id].lock()
    }
}

impl fmt::Debug for BlockRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for BlockRef<'_> {
    fn drop(&mut self) {
        self.pool.release_id(self.id);
    }
}
