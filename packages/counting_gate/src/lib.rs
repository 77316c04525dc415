//! A blocking counter with acquire-N and release-N semantics.
//!
//! [`CountingGate`] is a counting semaphore generalized to acquire and
//! release more than one unit at a time. It is the sole synchronization
//! primitive under the heterogeneous queue in this workspace: one gate
//! meters free bytes per storage block, another meters queued messages.
//!
//! The gate is safe under one-waiter/one-notifier and
//! one-waiter/many-notifier regimes. Simultaneous multi-waiter use is not
//! part of its contract (a release wakes one waiter).
//!
//! # Example
//!
//! ```rust
//! use counting_gate::CountingGate;
//!
//! let gate = CountingGate::new(2);
//!
//! gate.acquire(2);
//! assert!(!gate.try_acquire(1));
//!
//! gate.release(3);
//! assert!(gate.try_acquire(3));
//! ```

mod gate;

pub use gate::CountingGate;
