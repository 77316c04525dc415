use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use counting_gate::CountingGate;

use crate::block::Block;
use crate::envelope::{Envelope, MAX_ALIGN, envelope_size, header_size, payload_offset};

/// Default initial block capacity when the builder is not told otherwise.
const DEFAULT_INITIAL_CAPACITY: usize = 4096;

/// Single-producer / single-consumer FIFO storing values of mixed concrete
/// types inline in a chain of byte blocks.
///
/// The queue itself only owns the storage; [`split()`](Self::split) hands
/// out the two endpoints that move data. See the crate documentation for
/// the storage scheme.
///
/// # Thread safety
///
/// The queue is [`Send`] and [`Sync`] when the element interface `T` is
/// [`Send`]: every payload behind `&T` is then transferable, and the two
/// endpoints partition all interior state between themselves (arbitrated by
/// the per-block free-byte gates and the message gate), so they may run on
/// different threads.
pub struct HeterogeneousQueue<T: ?Sized> {
    /// Message credits: one per published element envelope. Padding and
    /// block-switch envelopes do not contribute, so a consumer wakes only
    /// for real payloads.
    pending_messages: CountingGate,

    /// State touched only through the unique [`Producer`] endpoint
    /// (or with `&mut self`).
    producer: UnsafeCell<ProducerState>,

    /// State touched only through the unique [`Consumer`] endpoint
    /// (or with `&mut self`).
    consumer: UnsafeCell<ConsumerState<T>>,
}

struct ProducerState {
    /// The block currently receiving writes.
    write_block: NonNull<Block>,

    /// Producer's next write address, always within the write block and
    /// always leaving at least one envelope header of room before the
    /// block's end.
    write_pos: NonNull<u8>,

    /// Older blocks still holding undrained envelopes, oldest first.
    /// Released when a wrap-around in the write block proves the consumer
    /// has moved past them.
    decaying_blocks: Vec<NonNull<Block>>,
}

struct ConsumerState<T: ?Sized> {
    /// The envelope most recently handed to the consumer (when
    /// `has_current`), or the next envelope to read.
    current: NonNull<Envelope<T>>,

    /// Whether `current` is a dequeued element envelope whose payload the
    /// consumer may still be borrowing.
    has_current: bool,
}

// SAFETY: All interior state is either internally synchronized (the gates)
// or partitioned: producer state is reached only through the unique
// Producer endpoint, consumer state only through the unique Consumer
// endpoint. Arena bytes are owned by exactly one endpoint at a time, with
// ownership transferred through gate release/acquire pairs (which establish
// happens-before). `T: Send` guarantees every payload reachable through the
// consumer side may cross threads.
unsafe impl<T: ?Sized + Send> Send for HeterogeneousQueue<T> {}
// SAFETY: See above; `&self` entry points are the endpoints (one per side)
// and the racy-by-contract `is_empty`.
unsafe impl<T: ?Sized + Send> Sync for HeterogeneousQueue<T> {}

impl<T: ?Sized> HeterogeneousQueue<T> {
    /// Starts building a queue.
    #[must_use]
    pub fn builder() -> HeterogeneousQueueBuilder<T> {
        HeterogeneousQueueBuilder {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            _queue: PhantomData,
        }
    }

    /// Borrows the queue as its two endpoints.
    ///
    /// The exclusive borrow guarantees at most one producer and one
    /// consumer exist at any moment. Both endpoints are [`Send`] (for
    /// `T: Send`), so each may be moved into its own thread, e.g. under
    /// [`std::thread::scope`].
    pub fn split(&mut self) -> (Producer<'_, T>, Consumer<'_, T>) {
        let queue = &*self;
        (Producer { queue }, Consumer { queue })
    }

    /// Returns `true` if no payload is currently queued.
    ///
    /// Purely informational: the other endpoint may change the answer at
    /// any time.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_messages.count() == 0
    }
}

impl<T: ?Sized> fmt::Debug for HeterogeneousQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeterogeneousQueue")
            .field("pending_messages", &self.pending_messages)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`HeterogeneousQueue`].
pub struct HeterogeneousQueueBuilder<T: ?Sized> {
    initial_capacity: usize,
    _queue: PhantomData<*const T>,
}

impl<T: ?Sized> HeterogeneousQueueBuilder<T> {
    /// Sets the capacity of the first storage block, in bytes.
    ///
    /// Later blocks double in size as needed, so this is a floor, not a
    /// limit. It must hold at least one envelope header plus one alignment
    /// quantum; ideally it also holds the largest single payload the
    /// caller intends to enqueue, to avoid growth on the first oversized
    /// value.
    #[must_use]
    pub fn initial_capacity(mut self, bytes: usize) -> Self {
        self.initial_capacity = bytes;
        self
    }

    /// Builds the queue.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity cannot hold one envelope header plus
    /// one alignment quantum, or if allocation fails.
    #[must_use]
    pub fn build(self) -> HeterogeneousQueue<T> {
        let minimum = header_size::<T>() + MAX_ALIGN;
        assert!(
            self.initial_capacity >= minimum,
            "initial capacity {} is below the minimum of {minimum} bytes",
            self.initial_capacity,
        );

        let block = Block::allocate(self.initial_capacity);

        // SAFETY: Just allocated; nothing else references the block.
        let begin = unsafe { block.as_ref().begin() };

        HeterogeneousQueue {
            pending_messages: CountingGate::new(0),
            producer: UnsafeCell::new(ProducerState {
                write_block: block,
                write_pos: begin,
                decaying_blocks: Vec::new(),
            }),
            consumer: UnsafeCell::new(ConsumerState {
                current: begin.cast(),
                has_current: false,
            }),
        }
    }
}

impl<T: ?Sized> fmt::Debug for HeterogeneousQueueBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeterogeneousQueueBuilder")
            .field("initial_capacity", &self.initial_capacity)
            .finish()
    }
}

/// The writing endpoint of a [`HeterogeneousQueue`].
pub struct Producer<'q, T: ?Sized> {
    queue: &'q HeterogeneousQueue<T>,
}

impl<T: Send> Producer<'_, T> {
    /// Constructs `value` in place inside the queue's storage and publishes
    /// it.
    ///
    /// Available when the element interface is a concrete type; for
    /// `dyn Trait` element universes see
    /// [`enqueue_as`](Self::enqueue_as) and
    /// [`define_element_interface!`](crate::define_element_interface).
    pub fn enqueue(&mut self, value: T) {
        self.enqueue_as(value, |value| value);
    }
}

impl<T: ?Sized> Producer<'_, T> {
    /// Constructs `value` in place and publishes it under the element
    /// interface `T`.
    ///
    /// `as_element` maps a reference to the stored value to a reference to
    /// its interface view; for a trait-object interface this is the
    /// identity coercion, e.g. `|value| value` where the closure's type
    /// makes `&U` coerce to `&dyn Trait`. The projection is captured once,
    /// at publish time, and the resulting pointer is what
    /// [`Consumer::dequeue`] later returns and what is dropped in place
    /// when the consumer advances past the value.
    ///
    /// A projection that returns a reference to something other than the
    /// stored value (a field, say) narrows what the consumer sees and what
    /// gets dropped; the rest of the value is simply never dropped.
    pub fn enqueue_as<U>(&mut self, value: U, as_element: for<'a> fn(&'a U) -> &'a T)
    where
        U: Send,
    {
        let env_size = envelope_size::<T, U>();
        let header = header_size::<T>();
        let min_needed = env_size + header;

        // SAFETY: This is the unique producer endpoint (split() hands out
        // one, borrowing the queue) and we hold &mut self, so nothing else
        // touches the producer half.
        let state = unsafe { &mut *self.queue.producer.get() };

        // SAFETY: The write block is freed only by this endpoint (wrap
        // branch below) or by the queue's drop, which cannot run while the
        // queue is borrowed.
        let block = unsafe { state.write_block.as_ref() };

        let tail = block.end() as usize - state.write_pos.as_ptr() as usize;
        debug_assert!(
            tail >= header,
            "tail reserve invariant violated: {tail} bytes left, header needs {header}",
        );

        // A racy snapshot, but conservatively so: only the consumer adds to
        // the gate, so the count can only have grown by the time we acquire.
        let free = block.free_bytes.count();

        if tail >= min_needed && free >= min_needed {
            block.free_bytes.acquire(env_size);

            // SAFETY: The acquired bytes start at write_pos and stay below
            // the block end (tail covers env_size plus the header reserve).
            unsafe {
                Self::write_element(state, value, as_element, env_size);
            }
        } else if free >= tail + min_needed {
            block.free_bytes.acquire(tail + env_size);

            // Free bytes at the front of the write block can only come from
            // the consumer having released envelopes here, which (FIFO)
            // means every older block is fully drained and untouched from
            // now on.
            for old in state.decaying_blocks.drain(..) {
                // SAFETY: See above; the consumer's cursor is past every
                // envelope owned by `old`.
                unsafe {
                    Block::free(old);
                }
            }

            // SAFETY: The padding consumes the whole tail (which the gate
            // just granted); the element lands at the block's start, also
            // granted.
            unsafe {
                Self::write_padding(state, tail);
                Self::write_element(state, value, as_element, env_size);
            }
        } else {
            let new_block = Block::allocate(grown_capacity(block.capacity(), min_needed));

            // The standing tail reserve guarantees this acquire succeeds
            // immediately.
            block.free_bytes.acquire(header);

            // SAFETY: The reserve bytes at write_pos were just acquired and
            // hold exactly one header.
            unsafe {
                Self::write_switch(state, new_block);
            }

            state.decaying_blocks.push(state.write_block);
            state.write_block = new_block;

            // SAFETY: Just allocated; only this endpoint references it.
            let new_block = unsafe { new_block.as_ref() };
            state.write_pos = new_block.begin();

            // A fresh block always covers one envelope plus the reserve.
            new_block.free_bytes.acquire(env_size);

            // SAFETY: As in the first branch.
            unsafe {
                Self::write_element(state, value, as_element, env_size);
            }
        }

        // Publish. The gate's internal lock makes everything written above
        // visible to the consumer that this credit wakes.
        self.queue.pending_messages.release(1);
    }

    /// Returns `true` if no payload is currently queued.
    ///
    /// Informational; see [`HeterogeneousQueue::is_empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Writes an element envelope at the write position and advances it.
    ///
    /// # Safety
    ///
    /// The caller must have acquired `env_size` bytes starting at the write
    /// position from the write block's gate.
    unsafe fn write_element<U>(
        state: &mut ProducerState,
        value: U,
        as_element: for<'a> fn(&'a U) -> &'a T,
        env_size: usize,
    ) {
        let env_ptr = state.write_pos.as_ptr().cast::<Envelope<T>>();

        // SAFETY: The granted range covers env_size bytes; one-past is a
        // valid address within or at the end of the block.
        let next = unsafe { state.write_pos.as_ptr().add(env_size) };

        // SAFETY: payload_offset puts the payload inside the granted range,
        // correctly aligned for U (envelope starts are aligned to the
        // quantum and U's alignment was validated against it).
        let payload_ptr = unsafe {
            state
                .write_pos
                .as_ptr()
                .add(payload_offset::<T, U>())
                .cast::<U>()
        };

        // SAFETY: payload_ptr is valid for writes of U per the above.
        unsafe {
            ptr::write(payload_ptr, value);
        }

        // SAFETY: The payload was just initialized; the reference is
        // transient and immediately turned back into a pointer.
        let payload = NonNull::from(as_element(unsafe { &*payload_ptr }));

        // SAFETY: env_ptr is the start of the granted, quantum-aligned
        // range; the header and the payload do not overlap.
        unsafe {
            ptr::write(
                env_ptr,
                Envelope {
                    next: next.cast::<Envelope<T>>(),
                    payload: Some(payload),
                    size: env_size,
                    block: state.write_block,
                },
            );
        }

        // SAFETY: `next` is within the allocation (or one-past, which the
        // tail reserve invariant rules out) and never null.
        state.write_pos = unsafe { NonNull::new_unchecked(next) };
    }

    /// Writes a padding envelope spanning the rest of the block and resets
    /// the write position to the block's beginning.
    ///
    /// # Safety
    ///
    /// The caller must have acquired the whole tail (of `padding_size`
    /// bytes) from the write block's gate.
    unsafe fn write_padding(state: &mut ProducerState, padding_size: usize) {
        let env_ptr = state.write_pos.as_ptr().cast::<Envelope<T>>();

        // SAFETY: The write block is alive; see enqueue_as.
        let begin = unsafe { state.write_block.as_ref() }.begin();

        // SAFETY: The tail reserve invariant guarantees at least one header
        // of granted space at write_pos.
        unsafe {
            ptr::write(
                env_ptr,
                Envelope {
                    next: begin.as_ptr().cast::<Envelope<T>>(),
                    payload: None,
                    size: padding_size,
                    block: state.write_block,
                },
            );
        }

        state.write_pos = begin;
    }

    /// Writes a block-switch envelope pointing into `new_block`.
    ///
    /// The caller updates the write block and position afterwards.
    ///
    /// # Safety
    ///
    /// The caller must have acquired one header's worth of bytes at the
    /// write position from the (old) write block's gate.
    unsafe fn write_switch(state: &mut ProducerState, new_block: NonNull<Block>) {
        let env_ptr = state.write_pos.as_ptr().cast::<Envelope<T>>();

        // SAFETY: Just allocated by the caller.
        let next = unsafe { new_block.as_ref() }.begin().as_ptr().cast::<Envelope<T>>();

        // SAFETY: The reserve bytes at write_pos hold exactly one header.
        unsafe {
            ptr::write(
                env_ptr,
                Envelope {
                    next,
                    payload: None,
                    size: header_size::<T>(),
                    // The switch envelope's bytes belong to the retiring
                    // block; releasing them there lets its free count
                    // return to full capacity.
                    block: state.write_block,
                },
            );
        }
    }
}

impl<T: ?Sized> fmt::Debug for Producer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

/// The reading endpoint of a [`HeterogeneousQueue`].
pub struct Consumer<'q, T: ?Sized> {
    queue: &'q HeterogeneousQueue<T>,
}

impl<T: ?Sized> Consumer<'_, T> {
    /// Returns a reference to the oldest unread payload, blocking until one
    /// is available.
    ///
    /// The reference borrows the consumer, so it naturally remains valid
    /// exactly until the next `dequeue` call (which needs the exclusive
    /// borrow back). Advancing past the previous payload drops it in
    /// place and returns its bytes to the owning block.
    pub fn dequeue(&mut self) -> &T {
        // SAFETY: This is the unique consumer endpoint and we hold
        // &mut self, so nothing else touches the consumer half.
        let state = unsafe { &mut *self.queue.consumer.get() };

        if state.has_current {
            // SAFETY: has_current means `current` is a published element
            // envelope; the payload reference handed out earlier is gone
            // (it borrowed self).
            unsafe {
                release_envelope(state);
            }
            self.queue.pending_messages.acquire(1);
        } else {
            self.queue.pending_messages.acquire(1);
            state.has_current = true;
        }

        // SAFETY: The acquired credit was released after the producer fully
        // wrote the element envelope and everything before it on the chain,
        // so each envelope we visit here is published. The skip loop is
        // bounded: at most one padding plus one switch envelope precede the
        // element.
        unsafe {
            while (*state.current.as_ptr()).payload.is_none() {
                release_envelope(state);
            }

            let payload = (*state.current.as_ptr())
                .payload
                .expect("skip loop stops only on an element envelope");
            payload.as_ref()
        }
    }

    /// Returns `true` if no payload is currently queued.
    ///
    /// Informational; see [`HeterogeneousQueue::is_empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for Consumer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}

/// Drops the current envelope's payload (if it has one), advances the
/// cursor, and returns the envelope's bytes to its owning block.
///
/// The byte release comes last: the moment it happens, the producer may
/// reuse the envelope's memory.
///
/// # Safety
///
/// `state.current` must point at a fully published envelope that the
/// consumer owns (a message credit covering it was acquired).
unsafe fn release_envelope<T: ?Sized>(state: &mut ConsumerState<T>) {
    let env_ptr = state.current.as_ptr();

    // SAFETY: The envelope is published and owned by the consumer per the
    // caller's guarantee.
    unsafe {
        if let Some(payload) = (*env_ptr).payload {
            ptr::drop_in_place(payload.as_ptr());
        }

        let size = (*env_ptr).size;
        let block = (*env_ptr).block;

        state.current = NonNull::new_unchecked((*env_ptr).next);

        block.as_ref().free_bytes.release(size);
    }
}

impl<T: ?Sized> Drop for HeterogeneousQueue<T> {
    fn drop(&mut self) {
        let consumer = self.consumer.get_mut();

        // Drain exactly as the consumer would, so every remaining payload
        // is dropped exactly once.
        //
        // SAFETY: &mut self gives exclusive access to both halves; every
        // envelope visited is covered by a previously acquired credit (the
        // held one for `current`, a fresh try_acquire for each element
        // after it).
        unsafe {
            if consumer.has_current {
                release_envelope(consumer);
            }

            while self.pending_messages.try_acquire(1) {
                while (*consumer.current.as_ptr()).payload.is_none() {
                    release_envelope(consumer);
                }
                release_envelope(consumer);
            }
        }

        let producer = self.producer.get_mut();

        for block in producer.decaying_blocks.drain(..) {
            // SAFETY: All envelopes were drained above; nothing references
            // the block anymore.
            unsafe {
                Block::free(block);
            }
        }

        // SAFETY: As above.
        unsafe {
            Block::free(producer.write_block);
        }
    }
}

/// Doubles `current` until it covers `min_needed`.
fn grown_capacity(current: usize, min_needed: usize) -> usize {
    let mut capacity = current
        .checked_mul(2)
        .expect("block capacity growth overflowed usize");

    while capacity < min_needed {
        capacity = capacity
            .checked_mul(2)
            .expect("block capacity growth overflowed usize");
    }

    capacity
}

#[cfg(test)]
impl<T: ?Sized> HeterogeneousQueue<T> {
    /// Number of retired blocks not yet released. Test instrumentation.
    pub(crate) fn decaying_block_count(&mut self) -> usize {
        self.producer.get_mut().decaying_blocks.len()
    }

    /// Bytes of the write block currently occupied by envelopes.
    /// Test instrumentation.
    pub(crate) fn write_block_occupancy(&mut self) -> usize {
        // SAFETY: &mut self; the block is alive until the queue drops.
        let block = unsafe { self.producer.get_mut().write_block.as_ref() };
        block.capacity() - block.free_bytes.count()
    }
}
