//! Downlink HARQ buffer pool
//!
//! Per-cell arena of fixed size, reference counted byte buffers. UEs get a
//! set of descriptors on creation and give them back to a shared free cache
//! on removal. The cache is refilled in small batches on a background
//! execution context so that UE creation never pays for bulk allocation.

use common::executor::TaskExecutor;
use common::types::DuUeIndex;
use common::utils::max_transport_block_bytes;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DlBufferPoolError {
    #[error("UE {0} holds no DL buffers")]
    UnknownUe(DuUeIndex),

    #[error("UE {ue_index} has no DL buffer in slot {slot}")]
    SlotOutOfRange { ue_index: DuUeIndex, slot: usize },

    #[error("DL buffer of UE {ue_index} slot {slot} is still in use")]
    BufferInUse { ue_index: DuUeIndex, slot: usize },

    #[error("Invalid DL buffer pool configuration: {0}")]
    InvalidConfig(String),
}

/// Pool dimensioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlBufferPoolConfig {
    /// Arena capacity in descriptors
    pub nof_descriptors: usize,
    /// Bytes per descriptor
    pub descriptor_len: usize,
    /// Descriptors carved when the pool is built
    pub initial_cache_size: usize,
    /// Replenishment starts when the free cache drops below this size
    pub low_water_mark: usize,
    /// Replenishment stops once the free cache reaches this size
    pub high_water_mark: usize,
    /// Descriptors carved per background batch
    pub replenish_batch: usize,
}

impl DlBufferPoolConfig {
    /// Size the descriptors for the largest transport block of a cell
    pub fn for_cell(nof_rbs: usize, nof_ports: usize, nof_descriptors: usize) -> Self {
        let high_water_mark = (nof_descriptors / 4).max(1);
        Self {
            nof_descriptors,
            descriptor_len: max_transport_block_bytes(nof_rbs, nof_ports),
            initial_cache_size: high_water_mark,
            low_water_mark: high_water_mark / 2,
            high_water_mark,
            replenish_batch: 16,
        }
    }

    pub fn validate(&self) -> Result<(), DlBufferPoolError> {
        if self.nof_descriptors == 0 || self.nof_descriptors > u32::MAX as usize {
            return Err(DlBufferPoolError::InvalidConfig(format!(
                "nof_descriptors={} out of range",
                self.nof_descriptors
            )));
        }
        if self.descriptor_len == 0 {
            return Err(DlBufferPoolError::InvalidConfig("descriptor_len must be positive".into()));
        }
        if self.low_water_mark > self.high_water_mark || self.high_water_mark > self.nof_descriptors {
            return Err(DlBufferPoolError::InvalidConfig(format!(
                "water marks must satisfy low ({}) <= high ({}) <= capacity ({})",
                self.low_water_mark, self.high_water_mark, self.nof_descriptors
            )));
        }
        if self.initial_cache_size > self.nof_descriptors {
            return Err(DlBufferPoolError::InvalidConfig(format!(
                "initial_cache_size={} exceeds capacity {}",
                self.initial_cache_size, self.nof_descriptors
            )));
        }
        if self.replenish_batch == 0 {
            return Err(DlBufferPoolError::InvalidConfig("replenish_batch must be positive".into()));
        }
        Ok(())
    }
}

/// Index of a descriptor in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(u32);

impl DescriptorId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Contiguous byte store split in equally sized descriptors
struct Arena {
    bytes: Box<[UnsafeCell<u8>]>,
    descriptor_len: usize,
    refcounts: Box<[AtomicU32]>,
    nof_carved: AtomicUsize,
}

// SAFETY: a descriptor region is only written through a `DlBufferHandle` that
// is the sole holder of the descriptor (refcount won through a 0 -> 1 CAS and
// still equal to 1), or while carving, before the descriptor is published.
unsafe impl Sync for Arena {}

impl Arena {
    fn new(nof_descriptors: usize, descriptor_len: usize) -> Self {
        // Zeroed allocation, pages are committed lazily on first touch
        let bytes = vec![0u8; nof_descriptors * descriptor_len].into_boxed_slice();
        // SAFETY: UnsafeCell<u8> has the same layout as u8
        let bytes = unsafe { Box::from_raw(Box::into_raw(bytes) as *mut [UnsafeCell<u8>]) };

        Self {
            bytes,
            descriptor_len,
            refcounts: (0..nof_descriptors).map(|_| AtomicU32::new(0)).collect(),
            nof_carved: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.refcounts.len()
    }

    fn nof_carved(&self) -> usize {
        self.nof_carved.load(Ordering::Acquire)
    }

    fn is_exhausted(&self) -> bool {
        self.nof_carved() >= self.capacity()
    }

    /// Take the next never used descriptor, None once the arena is exhausted
    fn carve(&self) -> Option<DescriptorId> {
        let capacity = self.capacity();
        let index = self
            .nof_carved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .ok()?;

        // SAFETY: the descriptor was just carved and is not yet visible to anyone else
        unsafe { self.region_mut(index) }.fill(0);

        Some(DescriptorId(index as u32))
    }

    fn refcount(&self, id: DescriptorId) -> &AtomicU32 {
        &self.refcounts[id.index()]
    }

    fn region(&self, index: usize) -> &[UnsafeCell<u8>] {
        let start = index * self.descriptor_len;
        &self.bytes[start..start + self.descriptor_len]
    }

    /// # Safety
    /// The caller must have exclusive access to descriptor `index`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn region_mut(&self, index: usize) -> &mut [u8] {
        let region = self.region(index);
        std::slice::from_raw_parts_mut(UnsafeCell::raw_get(region.as_ptr()), region.len())
    }

    /// # Safety
    /// No exclusive reference to descriptor `index` may be alive.
    unsafe fn region_ref(&self, index: usize) -> &[u8] {
        let region = self.region(index);
        std::slice::from_raw_parts(UnsafeCell::raw_get(region.as_ptr()), region.len())
    }
}

#[derive(Default)]
struct PoolState {
    /// Descriptors owned by no UE. May transiently hold descriptors still lent out.
    free_cache: VecDeque<DescriptorId>,
    ue_descriptors: HashMap<DuUeIndex, Vec<DescriptorId>>,
}

struct PoolShared {
    config: DlBufferPoolConfig,
    arena: Arena,
    state: Mutex<PoolState>,
    /// A replenishment batch chain is queued or running
    replenishing: AtomicBool,
}

/// Downlink buffer pool of one cell
pub struct DlBufferPool {
    shared: Arc<PoolShared>,
    bg_executor: Arc<dyn TaskExecutor>,
    /// Flag checked by every queued batch. Replaced, not reset, on cancellation.
    cancel: Mutex<Arc<AtomicBool>>,
}

impl DlBufferPool {
    pub fn new(
        config: DlBufferPoolConfig,
        bg_executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, DlBufferPoolError> {
        config.validate()?;

        let arena = Arena::new(config.nof_descriptors, config.descriptor_len);
        let mut state = PoolState::default();
        state
            .free_cache
            .extend((0..config.initial_cache_size).filter_map(|_| arena.carve()));

        info!(
            "DL buffer pool created: {} descriptors of {} bytes, {} cached",
            config.nof_descriptors,
            config.descriptor_len,
            state.free_cache.len()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                arena,
                state: Mutex::new(state),
                replenishing: AtomicBool::new(false),
            }),
            bg_executor,
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn config(&self) -> &DlBufferPoolConfig {
        &self.shared.config
    }

    /// Hand up to `count` descriptors to a UE, cached ones first.
    ///
    /// Returns the number of descriptors granted, which is lower than `count`
    /// when the arena is exhausted.
    pub fn allocate_for_ue(&self, ue_index: DuUeIndex, count: usize) -> usize {
        let arena = &self.shared.arena;
        let mut granted = Vec::with_capacity(count);

        let nof_cached = {
            let mut state = self.shared.state.lock();

            // Busy descriptors are rotated to the back of the cache
            let mut nof_scanned = state.free_cache.len();
            while granted.len() < count && nof_scanned > 0 {
                nof_scanned -= 1;
                let Some(id) = state.free_cache.pop_front() else {
                    break;
                };
                if arena.refcount(id).load(Ordering::Acquire) == 0 {
                    granted.push(id);
                } else {
                    state.free_cache.push_back(id);
                }
            }

            while granted.len() < count {
                match arena.carve() {
                    Some(id) => granted.push(id),
                    None => {
                        warn!(
                            "DL buffer pool exhausted: ue={} got {} of {} buffers",
                            ue_index,
                            granted.len(),
                            count
                        );
                        break;
                    }
                }
            }

            state
                .ue_descriptors
                .entry(ue_index)
                .or_default()
                .extend_from_slice(&granted);
            state.free_cache.len()
        };

        debug!("ue={}: allocated {} DL buffers, {} left in cache", ue_index, granted.len(), nof_cached);
        self.trigger_replenishment(nof_cached);

        granted.len()
    }

    /// Return every descriptor of the UE to the free cache, lent out or not.
    /// Returns the number of descriptors released.
    pub fn deallocate_for_ue(&self, ue_index: DuUeIndex) -> usize {
        let mut state = self.shared.state.lock();
        let Some(descriptors) = state.ue_descriptors.remove(&ue_index) else {
            return 0;
        };
        let count = descriptors.len();
        state.free_cache.extend(descriptors);
        debug!("ue={}: released {} DL buffers", ue_index, count);
        count
    }

    /// Lend the descriptor in `slot` of the UE
    pub fn borrow(&self, ue_index: DuUeIndex, slot: usize) -> Result<DlBufferHandle, DlBufferPoolError> {
        let id = {
            let state = self.shared.state.lock();
            let descriptors = state
                .ue_descriptors
                .get(&ue_index)
                .ok_or(DlBufferPoolError::UnknownUe(ue_index))?;
            *descriptors
                .get(slot)
                .ok_or(DlBufferPoolError::SlotOutOfRange { ue_index, slot })?
        };

        self.shared
            .arena
            .refcount(id)
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| DlBufferPoolError::BufferInUse { ue_index, slot })?;

        Ok(DlBufferHandle {
            shared: self.shared.clone(),
            id,
        })
    }

    /// Stop queued replenishment batches and give every UE buffer back to the cache
    pub fn reset(&self) {
        self.cancel_replenishment();

        let mut state = self.shared.state.lock();
        let PoolState {
            free_cache,
            ue_descriptors,
        } = &mut *state;
        for (_, descriptors) in ue_descriptors.drain() {
            free_cache.extend(descriptors);
        }
        info!("DL buffer pool reset, {} descriptors cached", free_cache.len());
    }

    /// Descriptors in the free cache, busy ones included
    pub fn nof_cached(&self) -> usize {
        self.shared.state.lock().free_cache.len()
    }

    /// Descriptors taken from the arena so far
    pub fn nof_carved(&self) -> usize {
        self.shared.arena.nof_carved()
    }

    pub fn capacity(&self) -> usize {
        self.shared.arena.capacity()
    }

    pub fn nof_ue_descriptors(&self, ue_index: DuUeIndex) -> usize {
        self.shared
            .state
            .lock()
            .ue_descriptors
            .get(&ue_index)
            .map_or(0, Vec::len)
    }

    /// Descriptors currently lent out
    pub fn nof_lent(&self) -> usize {
        let arena = &self.shared.arena;
        (0..arena.nof_carved())
            .filter(|&i| arena.refcounts[i].load(Ordering::Acquire) != 0)
            .count()
    }

    fn cancel_replenishment(&self) {
        let mut cancel = self.cancel.lock();
        cancel.store(true, Ordering::Release);
        *cancel = Arc::new(AtomicBool::new(false));
        self.shared.replenishing.store(false, Ordering::Release);
    }

    fn trigger_replenishment(&self, nof_cached: usize) {
        let shared = &self.shared;
        if nof_cached >= shared.config.low_water_mark || shared.arena.is_exhausted() {
            return;
        }
        if shared.replenishing.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancel = self.cancel.lock().clone();
        if !schedule_replenish_batch(shared.clone(), self.bg_executor.clone(), cancel) {
            warn!("Failed to schedule DL buffer replenishment. Cause: task queue is full");
            shared.replenishing.store(false, Ordering::Release);
        }
    }
}

impl Drop for DlBufferPool {
    fn drop(&mut self) {
        self.cancel.lock().store(true, Ordering::Release);
    }
}

fn schedule_replenish_batch(
    shared: Arc<PoolShared>,
    executor: Arc<dyn TaskExecutor>,
    cancel: Arc<AtomicBool>,
) -> bool {
    let next_executor = executor.clone();
    executor.execute(Box::new(move || run_replenish_batch(shared, next_executor, cancel)))
}

fn run_replenish_batch(shared: Arc<PoolShared>, executor: Arc<dyn TaskExecutor>, cancel: Arc<AtomicBool>) {
    if cancel.load(Ordering::Acquire) {
        return;
    }

    let carved: Vec<_> = (0..shared.config.replenish_batch)
        .map_while(|_| shared.arena.carve())
        .collect();

    let nof_cached = {
        let mut state = shared.state.lock();
        state.free_cache.extend(carved.iter().copied());
        state.free_cache.len()
    };
    debug!("DL buffer pool replenished {} descriptors, {} cached", carved.len(), nof_cached);

    let done = nof_cached >= shared.config.high_water_mark
        || shared.arena.is_exhausted()
        || cancel.load(Ordering::Acquire);
    if done {
        shared.replenishing.store(false, Ordering::Release);
        return;
    }

    if !schedule_replenish_batch(shared.clone(), executor, cancel) {
        warn!("Failed to schedule DL buffer replenishment. Cause: task queue is full");
        shared.replenishing.store(false, Ordering::Release);
    }
}

/// Scoped loan of one descriptor. The reference is released on drop.
pub struct DlBufferHandle {
    shared: Arc<PoolShared>,
    id: DescriptorId,
}

impl DlBufferHandle {
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.shared.arena.descriptor_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: exclusive access requires `&mut self` on the unique handle,
        // so no mutable view can coexist with this shared one
        unsafe { self.shared.arena.region_ref(self.id.index()) }
    }

    /// Writable view, only available while this is the sole reference
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.shared.arena.refcount(self.id).load(Ordering::Acquire) != 1 {
            return None;
        }
        // SAFETY: refcount 1 means this handle is the only one alive, and
        // `&mut self` keeps it from being cloned while the view exists
        Some(unsafe { self.shared.arena.region_mut(self.id.index()) })
    }
}

impl Clone for DlBufferHandle {
    fn clone(&self) -> Self {
        self.shared.arena.refcount(self.id).fetch_add(1, Ordering::Relaxed);
        Self {
            shared: self.shared.clone(),
            id: self.id,
        }
    }
}

impl Drop for DlBufferHandle {
    fn drop(&mut self) {
        self.shared.arena.refcount(self.id).fetch_sub(1, Ordering::Release);
    }
}

impl std::fmt::Debug for DlBufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlBufferHandle")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
