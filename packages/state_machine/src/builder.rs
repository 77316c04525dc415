use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::event::EventId;
use crate::machine::{StateId, StateMachine, StoredAction, StoredGuard, StoredHook, TransitionRecord};

/// In-progress declaration of a transition.
///
/// Created by [`StateMachine::on_transition`] and
/// [`StateMachine::on_internal`]. The declaration commits when the builder
/// is dropped, i.e. at the end of its statement for the common chained form:
///
/// ```rust
/// # use state_machine::{Event, StateMachine};
/// # #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
/// # enum S { A, B }
/// # let event: Event<i32> = Event::new();
/// # let machine = StateMachine::new(S::A);
/// machine
///     .on_transition(S::A, S::B, &event)
///     .when(|amount| *amount > 0)
///     .invoke(|_machine, amount| println!("moving with {amount}"));
/// ```
pub struct TransitionBuilder<'m, S: StateId, A: 'static> {
    machine: &'m StateMachine<S>,
    source: S,
    target: S,
    event_id: EventId,
    internal: bool,
    guard: Option<Rc<dyn Any>>,
    action: Option<Rc<dyn Any>>,
    _args: PhantomData<fn(A)>,
}

impl<'m, S: StateId, A: 'static> TransitionBuilder<'m, S, A> {
    pub(crate) fn new(
        machine: &'m StateMachine<S>,
        source: S,
        target: S,
        event_id: EventId,
        internal: bool,
    ) -> Self {
        Self {
            machine,
            source,
            target,
            event_id,
            internal,
            guard: None,
            action: None,
            _args: PhantomData,
        }
    }

    /// Guards the transition: it is taken only when `guard` returns `true`
    /// for the event's arguments.
    ///
    /// The guard must not consume or mutate the arguments (the same values
    /// are handed to the action afterwards); a panicking guard counts as
    /// having returned `false`.
    pub fn when(mut self, guard: impl Fn(&A) -> bool + 'static) -> Self {
        self.guard = Some(Rc::new(StoredGuard::<A>(Box::new(guard))));
        self
    }

    /// Attaches the transition's action and finishes the declaration.
    ///
    /// The action receives the machine (so it may raise further events on
    /// it) and the event's arguments by reference.
    pub fn invoke(mut self, action: impl Fn(&StateMachine<S>, &A) + 'static) {
        self.action = Some(Rc::new(StoredAction::<S, A>(Box::new(action))));
    }
}

impl<S: StateId, A: 'static> Drop for TransitionBuilder<'_, S, A> {
    fn drop(&mut self) {
        self.machine.commit_transition(
            self.source,
            self.event_id,
            TransitionRecord {
                target: self.target,
                internal: self.internal,
                guard: self.guard.take(),
                action: self.action.take(),
            },
        );
    }
}

impl<S: StateId, A: 'static> fmt::Debug for TransitionBuilder<'_, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionBuilder")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("event_id", &self.event_id)
            .field("internal", &self.internal)
            .finish_non_exhaustive()
    }
}

/// Which end of a state an [`ActionBuilder`] declares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ActionKind {
    Entry,
    Exit,
}

/// In-progress declaration of a state's entry or exit action.
///
/// Created by [`StateMachine::on_entry`] and [`StateMachine::on_exit`];
/// commits on drop, after [`invoke`](Self::invoke) supplied the action.
/// A builder dropped without `invoke` registers nothing.
#[must_use = "the action is registered when this builder goes out of scope"]
pub struct ActionBuilder<'m, S: StateId> {
    machine: &'m StateMachine<S>,
    state: S,
    kind: ActionKind,
    action: Option<Rc<StoredHook<S>>>,
}

impl<'m, S: StateId> ActionBuilder<'m, S> {
    pub(crate) fn new(machine: &'m StateMachine<S>, state: S, kind: ActionKind) -> Self {
        Self {
            machine,
            state,
            kind,
            action: None,
        }
    }

    /// Supplies the action and finishes the declaration.
    pub fn invoke(mut self, action: impl Fn(&StateMachine<S>) + 'static) {
        self.action = Some(Rc::new(StoredHook(Box::new(action))));
    }
}

impl<S: StateId> Drop for ActionBuilder<'_, S> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            self.machine.commit_action(self.state, self.kind, action);
        }
    }
}

impl<S: StateId> fmt::Debug for ActionBuilder<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBuilder")
            .field("state", &self.state)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
