//! Memory Pool
//!
//! Free list and counters live behind one pool-scoped lock. Hooks and the
//! backing allocator run outside of it.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{PoolError, Result};
use crate::slice::{
    calc_slice_size, Slice, SliceHeader, HEADER_SIZE, MAGIC_FREE, MAGIC_LIVE, WORD_ALIGN,
};

/// Per-slice constructor. Returning `false` vetoes the allocation.
pub type Constructor = Box<dyn Fn(&mut [u8]) -> bool + Send + Sync>;

/// Per-slice destructor, run when a slice goes back to the pool.
pub type Destructor = Box<dyn Fn(&mut [u8]) + Send + Sync>;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Free list and counters
struct State {
    /// Parked slices; the back is the most recently freed
    free: Vec<NonNull<SliceHeader>>,
    /// Slices currently allocated from the backing allocator
    total: usize,
    /// Exhaustion and backing-allocation failures
    failures: u64,
    /// Constructor vetoes
    rejected: u64,
}

// SAFETY: the free-list pointers are owned by the pool and only touched under the lock.
unsafe impl Send for State {}

impl State {
    fn outstanding(&self) -> usize {
        self.total - self.free.len()
    }
}

pub(crate) struct Shared {
    id: u32,
    name: String,
    slice_size: usize,
    layout: Layout,
    capacity: usize,
    ctor: Option<Constructor>,
    dtor: Option<Destructor>,
    state: Mutex<State>,
}

enum Source {
    Reuse(NonNull<SliceHeader>),
    Grow,
}

impl Shared {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn slice_size(&self) -> usize {
        self.slice_size
    }

    fn alloc(self: &Arc<Self>) -> Result<Slice> {
        let source = {
            let mut state = self.state.lock();
            if let Some(header) = state.free.pop() {
                Source::Reuse(header)
            } else if self.capacity > 0 && state.total >= self.capacity {
                state.failures += 1;
                trace!(pool = %self.name, capacity = self.capacity, "pool exhausted");
                return Err(PoolError::Exhausted {
                    pool: self.name.clone(),
                    capacity: self.capacity,
                });
            } else {
                // Reserve the slot so concurrent growth cannot overshoot the cap
                state.total += 1;
                Source::Grow
            }
        };

        let header = match source {
            Source::Reuse(header) => {
                // SAFETY: parked blocks stay allocated until recycled under the lock.
                let marker = unsafe { header.as_ref() }.magic.swap(MAGIC_LIVE, Ordering::AcqRel);
                if marker != MAGIC_FREE {
                    panic!("corrupted free list in pool {}: marker {:#x}", self.name, marker);
                }
                header
            }
            Source::Grow => self.grow()?,
        };

        let mut slice = Slice::from_header(header, Arc::clone(self));
        if let Some(ctor) = &self.ctor {
            if !ctor(&mut slice[..]) {
                self.park(slice.into_header(), |state| state.rejected += 1);
                return Err(PoolError::ConstructRejected {
                    pool: self.name.clone(),
                });
            }
        }
        Ok(slice)
    }

    fn grow(&self) -> Result<NonNull<SliceHeader>> {
        // SAFETY: the layout is never zero-sized.
        let raw = unsafe { alloc::alloc_zeroed(self.layout) };
        let Some(block) = NonNull::new(raw) else {
            let mut state = self.state.lock();
            state.total -= 1;
            state.failures += 1;
            return Err(PoolError::AllocFailed {
                size: self.layout.size(),
            });
        };

        let header = block.cast::<SliceHeader>();
        // SAFETY: fresh, suitably aligned block of at least HEADER_SIZE bytes.
        unsafe {
            header.write(SliceHeader {
                magic: AtomicU32::new(MAGIC_LIVE),
                pool_id: self.id,
            });
        }
        debug!(pool = %self.name, size = self.layout.size(), "grew pool by one slice");
        Ok(header)
    }

    /// Stamp a slice free and push it to the head of the free list.
    fn park(&self, header: NonNull<SliceHeader>, account: impl FnOnce(&mut State)) {
        // SAFETY: the caller owned the block until now.
        unsafe { header.as_ref() }.magic.store(MAGIC_FREE, Ordering::Release);
        let mut state = self.state.lock();
        state.free.push(header);
        account(&mut state);
    }

    pub(crate) fn release(&self, header: NonNull<SliceHeader>, bytes: &mut [u8]) {
        // SAFETY: the block is at worst parked on the free list, which is still allocated.
        let head = unsafe { header.as_ref() };
        if head.pool_id != self.id {
            panic!(
                "slice from pool #{} released into pool {} (#{})",
                head.pool_id, self.name, self.id
            );
        }
        if head
            .magic
            .compare_exchange(MAGIC_LIVE, MAGIC_FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("double free of a slice in pool {}", self.name);
        }

        if let Some(dtor) = &self.dtor {
            dtor(bytes);
        }

        self.state.lock().free.push(header);
    }

    fn recycle(&self, reserve: usize) -> usize {
        let released: Vec<NonNull<SliceHeader>> = {
            let mut state = self.state.lock();
            let excess = state.free.len().saturating_sub(reserve);
            // Coldest entries sit at the front
            let released: Vec<_> = state.free.drain(..excess).collect();
            state.total -= released.len();
            released
        };

        for header in &released {
            // SAFETY: unlinked from the free list above, nobody else can reach it.
            unsafe { alloc::dealloc(header.as_ptr().cast::<u8>(), self.layout) };
        }

        if !released.is_empty() {
            debug!(pool = %self.name, released = released.len(), reserve, "recycled slices");
        }
        released.len()
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            slice_size: self.slice_size,
            capacity: self.capacity,
            outstanding: state.outstanding(),
            free: state.free.len(),
            total: state.total,
            failures: state.failures,
            rejected: state.rejected,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for header in state.free.drain(..) {
            // SAFETY: last reference to the pool, the free list is exclusively ours.
            unsafe { alloc::dealloc(header.as_ptr().cast::<u8>(), self.layout) };
        }
    }
}

/// Pool counters, safe to poll from any thread
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    pub name: String,
    pub slice_size: usize,
    /// 0 means unlimited
    pub capacity: usize,
    pub outstanding: usize,
    pub free: usize,
    pub total: usize,
    pub failures: u64,
    pub rejected: u64,
}

/// A bounded pool of fixed-size slices.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<Shared>,
}

impl MemoryPool {
    /// Create a pool without hooks. `capacity == 0` means unlimited.
    pub fn new(name: &str, slice_size: usize, capacity: usize) -> Self {
        Self::builder(name, slice_size).capacity(capacity).build()
    }

    /// Start configuring a pool
    pub fn builder(name: &str, slice_size: usize) -> MemoryPoolBuilder {
        MemoryPoolBuilder {
            name: name.to_string(),
            slice_size,
            capacity: 0,
            ctor: None,
            dtor: None,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Take a slice from the free list, growing the pool if allowed.
    pub fn alloc(&self) -> Result<Slice> {
        self.shared.alloc()
    }

    /// Return a slice to the pool. Same as dropping it.
    ///
    /// Panics if the slice belongs to another pool.
    pub fn free(&self, slice: Slice) {
        if !Arc::ptr_eq(slice.pool(), &self.shared) {
            panic!(
                "slice from pool {} freed into pool {}",
                slice.pool_name(),
                self.shared.name
            );
        }
        drop(slice);
    }

    /// Hand free slices back to the backing allocator until at most
    /// `reserve` remain. Returns how many were released.
    pub fn recycle(&self, reserve: usize) -> usize {
        self.shared.recycle(reserve)
    }

    /// Release every free slice and report outstanding ones as leaks.
    ///
    /// The pool stays usable afterwards.
    pub fn exit(&self) -> PoolStats {
        self.shared.recycle(0);
        let stats = self.shared.stats();
        if stats.outstanding != 0 {
            error!(
                pool = %stats.name,
                leaked = stats.outstanding,
                "detected leaked slices at pool exit"
            );
        }
        stats
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Rounded slice size in bytes
    pub fn slice_size(&self) -> usize {
        self.shared.slice_size
    }

    /// Capacity cap (0 = unlimited)
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slices currently handed out
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding()
    }

    /// Exhaustion and backing-allocation failures so far
    pub fn failures(&self) -> u64 {
        self.shared.state.lock().failures
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("name", &self.shared.name)
            .field("slice_size", &self.shared.slice_size)
            .field("capacity", &self.shared.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Builder for [`MemoryPool`]
pub struct MemoryPoolBuilder {
    name: String,
    slice_size: usize,
    capacity: usize,
    ctor: Option<Constructor>,
    dtor: Option<Destructor>,
}

impl MemoryPoolBuilder {
    /// Maximum slices allocated at once (0 = unlimited)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Run `ctor` on every allocation; `false` rejects it.
    pub fn constructor<F>(mut self, ctor: F) -> Self
    where
        F: Fn(&mut [u8]) -> bool + Send + Sync + 'static,
    {
        self.ctor = Some(Box::new(ctor));
        self
    }

    /// Run `dtor` on every free.
    pub fn destructor<F>(mut self, dtor: F) -> Self
    where
        F: Fn(&mut [u8]) + Send + Sync + 'static,
    {
        self.dtor = Some(Box::new(dtor));
        self
    }

    /// Finish the pool. Panics on an empty name.
    pub fn build(self) -> MemoryPool {
        assert!(!self.name.is_empty(), "memory pool needs a name");

        let slice_size = calc_slice_size(self.slice_size);
        let layout = match Layout::from_size_align(HEADER_SIZE + slice_size, WORD_ALIGN) {
            Ok(layout) => layout,
            Err(e) => panic!("invalid slice size {} for pool {}: {}", slice_size, self.name, e),
        };

        debug!(
            pool = %self.name,
            slice_size,
            capacity = self.capacity,
            "memory pool created"
        );

        MemoryPool {
            shared: Arc::new(Shared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                slice_size,
                layout,
                capacity: self.capacity,
                ctor: self.ctor,
                dtor: self.dtor,
                state: Mutex::new(State {
                    free: Vec::new(),
                    total: 0,
                    failures: 0,
                    rejected: 0,
                }),
            }),
        }
    }
}
