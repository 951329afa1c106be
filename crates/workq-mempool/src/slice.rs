//! Slice handles and the control header in front of every slice

use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::pool::Shared;

/// Machine-word alignment applied to every slice
pub const WORD_ALIGN: usize = mem::align_of::<usize>();

/// Bytes reserved in front of each slice for the control header
pub const HEADER_SIZE: usize = align_up(mem::size_of::<SliceHeader>(), WORD_ALIGN);

/// Marker stamped on slices handed out to callers
pub(crate) const MAGIC_LIVE: u32 = 0x5408_5408;
/// Marker stamped on slices parked on the free list
pub(crate) const MAGIC_FREE: u32 = 0x0339_4720;

/// Control header. Lives in the same backing block, right before the payload.
#[repr(C)]
pub(crate) struct SliceHeader {
    pub(crate) magic: AtomicU32,
    pub(crate) pool_id: u32,
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Round a requested slice size up to at least [`HEADER_SIZE`] and to
/// machine-word alignment.
///
/// ```rust
/// use workq_mempool::{calc_slice_size, HEADER_SIZE, WORD_ALIGN};
///
/// assert_eq!(calc_slice_size(1), HEADER_SIZE);
/// assert_eq!(calc_slice_size(HEADER_SIZE + 1) % WORD_ALIGN, 0);
/// ```
pub fn calc_slice_size(input: usize) -> usize {
    align_up(input.max(HEADER_SIZE), WORD_ALIGN)
}

/// A fixed-size byte block owned by the caller.
///
/// Dropping the handle returns the slice to its pool (running the pool's
/// destructor hook first); [`MemoryPool::free`](crate::MemoryPool::free) is
/// the explicit spelling of the same thing.
pub struct Slice {
    header: NonNull<SliceHeader>,
    pool: Arc<Shared>,
}

// SAFETY: a Slice is the unique owner of its block; the header marker is atomic.
unsafe impl Send for Slice {}
unsafe impl Sync for Slice {}

impl Slice {
    /// Wrap a block that has just been stamped live for `pool`.
    pub(crate) fn from_header(header: NonNull<SliceHeader>, pool: Arc<Shared>) -> Self {
        Self { header, pool }
    }

    /// Give up the handle without returning the block to the pool.
    pub(crate) fn into_header(self) -> NonNull<SliceHeader> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out exactly once.
        drop(unsafe { std::ptr::read(&this.pool) });
        this.header
    }

    pub(crate) fn header(&self) -> &SliceHeader {
        // SAFETY: the block stays allocated while a handle to it exists.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn pool(&self) -> &Arc<Shared> {
        &self.pool
    }

    fn payload(&self) -> NonNull<u8> {
        // SAFETY: every block is HEADER_SIZE + slice_size bytes long.
        unsafe { self.header.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Usable bytes in this slice
    pub fn len(&self) -> usize {
        self.pool.slice_size()
    }

    /// Slices are never zero-sized
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Name of the owning pool
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Pointer to the first payload byte
    pub fn as_ptr(&self) -> *const u8 {
        self.payload().as_ptr()
    }

    /// Mutable pointer to the first payload byte
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.payload().as_ptr()
    }

    /// Release ownership of the slice, returning its payload pointer.
    ///
    /// The block stays out of the pool until it is rebuilt with
    /// [`Slice::from_raw`] and dropped.
    pub fn into_raw(self) -> NonNull<u8> {
        let payload = self.payload();
        self.into_header();
        payload
    }

    /// Rebuild a handle from a pointer returned by [`Slice::into_raw`].
    ///
    /// Panics if the header does not belong to `pool`.
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` on a slice of `pool`, and its block
    /// must not have been handed back to the backing allocator since.
    pub unsafe fn from_raw(pool: &crate::MemoryPool, ptr: NonNull<u8>) -> Self {
        // SAFETY: guaranteed by the caller.
        let header = unsafe { ptr.sub(HEADER_SIZE) }.cast::<SliceHeader>();
        let shared = pool.shared();
        // SAFETY: the block is still allocated per the caller's contract.
        let pool_id = unsafe { header.as_ref() }.pool_id;
        if pool_id != shared.id() {
            panic!(
                "slice from pool #{} handed to pool {} (#{})",
                pool_id,
                shared.name(),
                shared.id()
            );
        }
        Self::from_header(header, Arc::clone(shared))
    }
}

impl Deref for Slice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: payload is len() initialized bytes owned by this handle.
        unsafe { std::slice::from_raw_parts(self.payload().as_ptr(), self.len()) }
    }
}

impl DerefMut for Slice {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the handle is borrowed mutably.
        unsafe { std::slice::from_raw_parts_mut(self.payload().as_ptr(), self.len()) }
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for Slice {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("pool", &self.pool.name())
            .field("len", &self.len())
            .field("live", &(self.header().magic.load(Ordering::Relaxed) == MAGIC_LIVE))
            .finish()
    }
}

impl Drop for Slice {
    fn drop(&mut self) {
        let len = self.len();
        // SAFETY: the block stays allocated until `release` parks it.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.payload().as_ptr(), len) };
        self.pool.release(self.header, bytes);
    }
}
