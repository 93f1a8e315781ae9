//! Pre-allocated, fixed-size byte buffer pool (component C1).
//!
//! A [`Pool`] hands out [`Segment`]s of a fixed `segment_size`. Pool-sized
//! segments are recycled through a free list on release; oversize segments
//! (requested via [`Pool::acquire_sized`]) are never recycled. See
//! `SPEC_FULL.md` section 4.1.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Default segment size, in bytes (spec section 4.1).
pub const DEFAULT_SEGMENT_SIZE: usize = 8192;
/// Default number of segments pre-allocated at pool construction.
pub const DEFAULT_INITIAL_POOL_SIZE: usize = 1000;

/// Construction parameters for a [`Pool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Size, in bytes, of a pool-sized segment.
    pub segment_size: usize,
    /// Number of segments to pre-allocate eagerly at construction.
    pub initial_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            segment_size: DEFAULT_SEGMENT_SIZE,
            initial_pool_size: DEFAULT_INITIAL_POOL_SIZE,
        }
    }
}

/// Errors surfaced by pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been closed; no further acquisitions are possible.
    PoolClosed,
    /// A segment was released to a pool that did not issue it.
    ForeignSegment,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::PoolClosed => write!(f, "pool is closed"),
            PoolError::ForeignSegment => write!(f, "segment does not belong to this pool"),
        }
    }
}

impl std::error::Error for PoolError {}

struct Inner {
    segment_size: usize,
    free_list: Mutex<Vec<Box<[u8]>>>,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
    closed: AtomicBool,
    id: usize,
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// A shared, thread-safe provider of [`Segment`]s.
///
/// Cloning a `Pool` is cheap (it is a handle around an `Arc`); every clone
/// refers to the same underlying arena.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Construct a pool with `config`, eagerly pre-allocating
    /// `config.initial_pool_size` segments onto the free list.
    pub fn new(config: PoolConfig) -> Self {
        let free_list: Vec<Box<[u8]>> = (0..config.initial_pool_size)
            .map(|_| vec![0u8; config.segment_size].into_boxed_slice())
            .collect();
        let allocated = free_list.len();
        tracing::debug!(
            segment_size = config.segment_size,
            initial_pool_size = config.initial_pool_size,
            "constructed segment pool"
        );
        Pool {
            inner: Arc::new(Inner {
                segment_size: config.segment_size,
                free_list: Mutex::new(free_list),
                allocated: AtomicUsize::new(allocated),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    /// Construct a pool with the default configuration (8192-byte segments,
    /// 1000 pre-allocated).
    pub fn with_defaults() -> Self {
        Pool::new(PoolConfig::default())
    }

    /// The fixed size of a pool-sized segment.
    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }

    /// Number of segments currently parked on the free list.
    pub fn pooled_count(&self) -> usize {
        self.inner.free_list.lock().len()
    }

    /// Number of segments currently leased out (pool-sized or oversize).
    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Total number of pool-sized segments ever allocated from the arena
    /// (free list + in use).
    pub fn allocated_count(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Acquire a pool-sized segment: pop the free list if non-empty,
    /// otherwise grow the arena by one fresh zeroed segment.
    pub fn acquire(&self) -> Result<Segment, PoolError> {
        self.acquire_sized(self.inner.segment_size)
    }

    /// Acquire a segment of at least `n` bytes.
    ///
    /// If `n <= segment_size`, behaves exactly as [`Pool::acquire`] (the
    /// returned segment is still `segment_size` bytes and is eligible for
    /// recycling). Otherwise a one-off segment of exactly `n` bytes is
    /// allocated outside the pool and is never recycled on release.
    pub fn acquire_sized(&self, n: usize) -> Result<Segment, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        if n <= self.inner.segment_size {
            let bytes = {
                let mut free_list = self.inner.free_list.lock();
                free_list.pop()
            };
            let bytes = match bytes {
                Some(b) => b,
                None => {
                    self.inner.allocated.fetch_add(1, Ordering::AcqRel);
                    tracing::warn!(
                        segment_size = self.inner.segment_size,
                        in_use = self.inner.in_use.load(Ordering::Relaxed),
                        "pool grew beyond pre-allocated capacity"
                    );
                    vec![0u8; self.inner.segment_size].into_boxed_slice()
                }
            };
            self.inner.in_use.fetch_add(1, Ordering::AcqRel);
            Ok(Segment {
                pool: Some(self.inner.clone()),
                bytes: Some(bytes),
                pooled_size: self.inner.segment_size,
                oversize: false,
            })
        } else {
            self.inner.in_use.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(n, "allocating oversize segment outside pool");
            Ok(Segment {
                pool: Some(self.inner.clone()),
                bytes: Some(vec![0u8; n].into_boxed_slice()),
                pooled_size: self.inner.segment_size,
                oversize: true,
            })
        }
    }

    /// Release a segment back to this pool. Pool-sized segments are zeroed
    /// and pushed onto the free list; oversize segments are simply dropped.
    ///
    /// Consuming `seg` makes this the natural place to enforce the
    /// release-once discipline: a `Segment` can only be released by value.
    pub fn release(&self, mut seg: Segment) -> Result<(), PoolError> {
        match seg.pool.take() {
            Some(owner) if Arc::ptr_eq(&owner, &self.inner) => {
                self.release_inner(seg.bytes.take(), seg.oversize);
                Ok(())
            }
            Some(_) => Err(PoolError::ForeignSegment),
            None => Err(PoolError::ForeignSegment),
        }
    }

    fn release_inner(&self, bytes: Option<Box<[u8]>>, oversize: bool) {
        if let Some(mut bytes) = bytes {
            self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
            if !oversize {
                bytes.iter_mut().for_each(|b| *b = 0);
                self.inner.free_list.lock().push(bytes);
            }
        }
    }

    /// Drop the entire arena. Outstanding segments become invalid (their
    /// accessors still work on their owned bytes, but further pool
    /// operations fail).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.free_list.lock().clear();
    }

    /// Whether [`Pool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A leased, fixed-extent region of bytes.
///
/// A `Segment` is single-owner: while leased it belongs exclusively to the
/// holder. Dropping it without an explicit [`Pool::release`] call still
/// returns the underlying storage to its pool's free list (when pool-sized),
/// matching the "scoped acquisition" guarantee from section 5 of the spec —
/// release happens on every exit path, including panics.
pub struct Segment {
    pool: Option<Arc<Inner>>,
    bytes: Option<Box<[u8]>>,
    pooled_size: usize,
    oversize: bool,
}

impl Segment {
    /// Size, in bytes, of this segment.
    pub fn len(&self) -> usize {
        self.bytes.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether this segment has zero length (never true for a live lease).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this segment bypassed the pool (requested larger than
    /// `segment_size`) and therefore will not be recycled.
    pub fn is_oversize(&self) -> bool {
        self.oversize
    }

    /// Borrow the full segment as bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    /// Mutably borrow the full segment as bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.bytes.as_deref_mut().unwrap_or(&mut [])
    }

    /// Zero-copy, read-only view into `[off, off+len)` of this segment.
    pub fn slice(&self, off: usize, len: usize) -> &[u8] {
        &self.as_slice()[off..off + len]
    }

    /// Zero-copy, mutable view into `[off, off+len)` of this segment.
    pub fn slice_mut(&mut self, off: usize, len: usize) -> &mut [u8] {
        &mut self.as_mut_slice()[off..off + len]
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            if let Some(mut bytes) = self.bytes.take() {
                pool.in_use.fetch_sub(1, Ordering::AcqRel);
                if !self.oversize {
                    bytes.iter_mut().for_each(|b| *b = 0);
                    pool.free_list.lock().push(bytes);
                }
            }
        }
    }
}
