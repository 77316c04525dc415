//! Single-producer / single-consumer FIFO that stores values of mixed
//! concrete types *inline*, in a chain of contiguous byte blocks.
//!
//! [`HeterogeneousQueue<T>`] accepts any value whose reference coerces to
//! the element interface `T` (a concrete type, or `dyn Trait` for an open
//! universe of payload types) and constructs it directly inside its arena.
//! The consumer gets a zero-copy `&T` to the oldest unread payload, stable
//! until the next dequeue.
//!
//! # Storage scheme
//!
//! ```text
//! block 0 (capacity C)                         block 1 (capacity 2C)
//! ┌────────┬────────────┬─────────┬────────┐   ┌────────────┬───────────┐
//! │ env A  │ env B      │ env C   │ switch ┼─▶ │ env D      │ ...       │
//! │ hdr+val│ hdr+value  │ hdr+val │ hdr    │   │ hdr+value  │           │
//! └────────┴────────────┴─────────┴────────┘   └────────────┴───────────┘
//!   ▲ consumer cursor follows `next` links in production order
//! ```
//!
//! Each payload sits behind a fixed-layout *envelope* header carrying the
//! next-envelope link, the payload pointer, the envelope's size and its
//! owning block. Two header-only envelope kinds keep the chain walkable
//! when values do not fit linearly: a *padding* envelope fills a block's
//! unusable tail and wraps the chain to the block's beginning; a
//! *block-switch* envelope links into a freshly allocated successor block
//! of doubled capacity.
//!
//! Space accounting is a pair of counting gates (see the `counting_gate`
//! package): each block meters its free bytes, and the queue meters
//! published payloads. The producer acquires bytes before writing; the
//! consumer releases an envelope's bytes after advancing past it; the
//! release of a message credit happens-after the envelope write, which is
//! what makes the zero-copy handoff safe without any lock around the arena
//! itself.
//!
//! The producer always keeps one envelope header of room at the write
//! block's tail, so a padding or switch envelope can be placed without
//! waiting. Retired blocks decay: the producer frees them the next time a
//! wrap-around proves the consumer has moved past them.
//!
//! # Concurrency bounds
//!
//! Exactly one producer and one consumer, obtained together from
//! [`HeterogeneousQueue::split`]; each may live on its own thread.
//! `is_empty` is a racy snapshot callable from either side. Dropping the
//! queue drains every remaining payload, dropping each exactly once.
//!
//! # Example
//!
//! ```rust
//! use hetero_queue::HeterogeneousQueue;
//!
//! let mut queue = HeterogeneousQueue::<u32>::builder()
//!     .initial_capacity(256)
//!     .build();
//! let (mut producer, mut consumer) = queue.split();
//!
//! producer.enqueue(42);
//! producer.enqueue(33);
//!
//! assert_eq!(*consumer.dequeue(), 42);
//! assert_eq!(*consumer.dequeue(), 33);
//! assert!(producer.is_empty());
//! ```
//!
//! For mixed payload types, pick a trait as the element interface and
//! either spell out the coercion per call with
//! [`Producer::enqueue_as`] or generate a typed `enqueue` with
//! [`define_element_interface!`].

mod block;
mod envelope;
mod interface;
mod queue;

pub use queue::{Consumer, HeterogeneousQueue, HeterogeneousQueueBuilder, Producer};
