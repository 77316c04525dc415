use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-global source of event identities.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// Stable integer identity of an event.
///
/// Identities are minted once per [`Event`] value and never depend on
/// textual names; copies of an event share its identity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct EventId(u64);

/// A typed event handle.
///
/// `A` is the event's argument tuple type: whatever one dispatch carries,
/// from `()` to a tuple of several values. The handle itself is just an
/// identity plus the compile-time binding to `A`; machines key their
/// transition tables by `(state, identity)` and recover the argument type
/// at dispatch, so the binding must be consistent: create each event once
/// and pass copies around.
///
/// # Example
///
/// ```rust
/// use state_machine::Event;
///
/// let left_click: Event<(i32, i32)> = Event::new();
/// let copy = left_click;
///
/// // Copies are the same event.
/// assert_eq!(format!("{left_click:?}"), format!("{copy:?}"));
/// ```
pub struct Event<A> {
    id: EventId,
    _args: PhantomData<fn(A)>,
}

impl<A> Event<A> {
    /// Mints a new event with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)),
            _args: PhantomData,
        }
    }

    pub(crate) fn id(&self) -> EventId {
        self.id
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Event<A> {}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_event_gets_a_distinct_identity() {
        let first: Event<()> = Event::new();
        let second: Event<()> = Event::new();
        let third: Event<i32> = Event::new();

        assert_ne!(first.id(), second.id());
        assert_ne!(second.id(), third.id());
    }

    #[test]
    fn copies_share_the_identity() {
        let event: Event<(i32, String)> = Event::new();
        let copy = event;

        assert_eq!(event.id(), copy.id());
    }
}
