//! Identity-keyed publisher of data-change notifications.
//!
//! A [`Publisher`] maps opaque subscriber handles to notification closures
//! and calls every closure, in subscription order, each time the data owner
//! publishes a change. Duplicate subscription and unknown unsubscription
//! are non-fatal: they report one diagnostic line and return `false`.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use pubsub::{Publisher, SubscriberId};
//!
//! let mut publisher = Publisher::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let subscriber = SubscriberId::new();
//! {
//!     let seen = Rc::clone(&seen);
//!     assert!(publisher.subscribe(subscriber, move |value: &i32| {
//!         seen.borrow_mut().push(*value);
//!     }));
//! }
//!
//! publisher.publish(&7);
//! publisher.publish(&8);
//! assert!(publisher.unsubscribe(subscriber));
//!
//! publisher.publish(&9);
//! assert_eq!(*seen.borrow(), [7, 8]);
//! ```

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use diagnostics::{DiagnosticSink, TracingSink};

/// Process-global source of subscriber identities.
static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque handle identifying one subscription.
///
/// Mint one per subscriber with [`SubscriberId::new`] and keep it around to
/// unsubscribe later; copies compare equal to the original.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Mints a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes values of type `T` to its current subscribers.
pub struct Publisher<T> {
    sink: Rc<dyn DiagnosticSink>,
    /// Subscriptions in insertion order; notification follows this order.
    subscribers: Vec<(SubscriberId, Box<dyn Fn(&T)>)>,
}

impl<T> Publisher<T> {
    /// Creates a publisher with no subscribers, reporting diagnostics
    /// through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Rc::new(TracingSink::new()))
    }

    /// Creates a publisher reporting diagnostics to the given sink.
    #[must_use]
    pub fn with_sink(sink: Rc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            subscribers: Vec::new(),
        }
    }

    /// Registers `notify` to be called on every publish.
    ///
    /// Returns `false` (and reports a diagnostic) if `subscriber` is
    /// already subscribed; the existing subscription is kept.
    pub fn subscribe(&mut self, subscriber: SubscriberId, notify: impl Fn(&T) + 'static) -> bool {
        if self.position(subscriber).is_some() {
            self.sink
                .report(&format!("cannot add subscriber {subscriber:?}: duplicate"));
            return false;
        }

        self.subscribers.push((subscriber, Box::new(notify)));
        true
    }

    /// Removes a subscription.
    ///
    /// Returns `false` (and reports a diagnostic) if `subscriber` is not
    /// subscribed.
    pub fn unsubscribe(&mut self, subscriber: SubscriberId) -> bool {
        let Some(position) = self.position(subscriber) else {
            self.sink.report(&format!(
                "cannot remove subscriber {subscriber:?}: non-existent"
            ));
            return false;
        };

        self.subscribers.remove(position);
        true
    }

    /// Notifies every subscriber of a data change, in subscription order.
    ///
    /// Called by the data owner after the change took effect.
    pub fn publish(&self, data: &T) {
        for (_, notify) in &self.subscribers {
            notify(data);
        }
    }

    /// Number of current subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn position(&self, subscriber: SubscriberId) -> Option<usize> {
        self.subscribers
            .iter()
            .position(|(existing, _)| *existing == subscriber)
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subscriber_count", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
