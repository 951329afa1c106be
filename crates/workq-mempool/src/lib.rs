//! workq Memory Pool
//!
//! A kmem-cache-like pool of fixed-size byte slices.
//!
//! # Goals
//! - Job memory independent of the general allocator's fast paths
//! - Bounded: an optional cap turns growth into explicit backpressure
//! - Hot reuse: freed slices are handed out again most-recent first
//!
//! Slices are lazily allocated from the backing allocator up to the cap,
//! parked on a free list when released, and only returned to the backing
//! allocator by [`MemoryPool::recycle`], [`MemoryPool::exit`] or when the
//! last handle to the pool goes away.
//!
//! # Example
//! ```rust
//! use workq_mempool::{MemoryPool, PoolError};
//!
//! let pool = MemoryPool::new("msg", 48, 2);
//! let a = pool.alloc()?;
//! let _b = pool.alloc()?;
//! assert!(matches!(pool.alloc(), Err(PoolError::Exhausted { .. })));
//!
//! drop(a);
//! let _c = pool.alloc()?;
//! # Ok::<(), PoolError>(())
//! ```

mod error;
mod pool;
mod slice;

pub use error::{PoolError, Result};
pub use pool::{Constructor, Destructor, MemoryPool, MemoryPoolBuilder, PoolStats};
pub use slice::{calc_slice_size, Slice, HEADER_SIZE, WORD_ALIGN};

// Mimalloc global allocator (optional feature)
#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
