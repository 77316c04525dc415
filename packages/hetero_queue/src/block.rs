use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use counting_gate::CountingGate;

use crate::envelope::MAX_ALIGN;

/// An owned byte region of fixed capacity plus the gate metering its free
/// bytes.
///
/// The producer linearly writes envelopes into the region, acquiring bytes
/// from `free_bytes` before each write; the consumer releases an envelope's
/// bytes back after advancing past it. The gate is the only part of a block
/// that both endpoints touch, so a block needs no further synchronization.
///
/// The write cursor itself lives with the producer, not here: only the
/// block currently receiving writes has one.
#[derive(Debug)]
pub(crate) struct Block {
    /// Start of the byte region, aligned to the alignment quantum.
    storage: NonNull<u8>,

    /// Region size in bytes. `free_bytes` never exceeds it.
    capacity: usize,

    /// Bytes not currently occupied by a live envelope.
    pub(crate) free_bytes: CountingGate,
}

impl Block {
    /// Allocates a block of `capacity` bytes and returns an owning pointer.
    ///
    /// The caller releases it with [`Block::free`].
    #[must_use]
    pub(crate) fn allocate(capacity: usize) -> NonNull<Block> {
        let layout = Layout::from_size_align(capacity, MAX_ALIGN)
            .expect("block layout is valid for any capacity below isize::MAX");

        // SAFETY: The layout has non-zero size; capacity is validated by the
        // queue builder to hold at least one envelope header.
        let storage = NonNull::new(unsafe { alloc(layout) })
            .expect("we do not intend to handle allocation failure as a real possibility - OOM results in panic");

        let block = Box::new(Self {
            storage,
            capacity,
            free_bytes: CountingGate::new(capacity),
        });

        // SAFETY: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(block)) }
    }

    /// Frees a block previously returned by [`Block::allocate`].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no envelope within the block is still
    /// reachable from the consumer's cursor and that the pointer is not
    /// used again.
    pub(crate) unsafe fn free(block: NonNull<Block>) {
        // SAFETY: The pointer came from Box::into_raw in allocate() and per
        // the caller's guarantee nothing references the block anymore.
        drop(unsafe { Box::from_raw(block.as_ptr()) });
    }

    /// First byte of the region.
    #[must_use]
    pub(crate) fn begin(&self) -> NonNull<u8> {
        self.storage
    }

    /// One past the last byte of the region.
    #[must_use]
    pub(crate) fn end(&self) -> *mut u8 {
        // SAFETY: storage..storage+capacity is the allocation made in
        // allocate(); one-past-the-end is a valid provenance-carrying
        // address.
        unsafe { self.storage.as_ptr().add(self.capacity) }
    }

    /// Region size in bytes.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, MAX_ALIGN)
            .expect("layout was already validated in allocate()");

        // SAFETY: storage was allocated in allocate() with this exact
        // layout and has not been deallocated yet.
        unsafe {
            dealloc(self.storage.as_ptr(), layout);
        }
    }
}

// SAFETY: The byte region is exclusively partitioned between the two
// endpoints by the free-byte gate; the gate itself is Sync. The raw storage
// pointer is only dereferenced by whichever endpoint owns the bytes in
// question.
unsafe impl Send for Block {}
// SAFETY: See above; shared references to a block only expose the gate and
// immutable geometry.
unsafe impl Sync for Block {}
