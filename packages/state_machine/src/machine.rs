use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use diagnostics::{DiagnosticSink, TracingSink};
use foldhash::{HashMap, HashMapExt};

use crate::builder::{ActionBuilder, ActionKind, TransitionBuilder};
use crate::event::{Event, EventId};

/// The opaque state identifier type: any small copyable value with identity,
/// typically a client-supplied enumeration.
pub trait StateId: Copy + Eq + Hash + Debug + 'static {}

impl<S> StateId for S where S: Copy + Eq + Hash + Debug + 'static {}

/// A guard stored with its argument type erased.
pub(crate) struct StoredGuard<A>(pub(crate) Box<dyn Fn(&A) -> bool>);

/// A transition action stored with its argument type erased.
pub(crate) struct StoredAction<S: StateId, A>(pub(crate) Box<dyn Fn(&StateMachine<S>, &A)>);

/// An entry or exit action.
pub(crate) struct StoredHook<S: StateId>(pub(crate) Box<dyn Fn(&StateMachine<S>)>);

/// One registered transition under a `(source, event)` key.
///
/// The guard and action keep only `dyn Any` erasure here; the dispatch site
/// recovers the argument type from the typed [`Event`] it was handed.
pub(crate) struct TransitionRecord<S> {
    pub(crate) target: S,
    pub(crate) internal: bool,
    pub(crate) guard: Option<Rc<dyn Any>>,
    pub(crate) action: Option<Rc<dyn Any>>,
}

impl<S: Copy> Clone for TransitionRecord<S> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            internal: self.internal,
            guard: self.guard.clone(),
            action: self.action.clone(),
        }
    }
}

/// A hierarchical, event-driven finite-state machine.
///
/// States are client-supplied identifiers (see [`StateId`]); events are typed
/// [`Event`] handles. Configuration (transitions, entry/exit actions,
/// hierarchy) happens up front through builder calls; the first handled
/// event (or an explicit [`enter_initial_state`](Self::enter_initial_state))
/// freezes the transition tables and runs the initial entry chain.
///
/// One machine is strictly single-threaded and handles one event at a time.
/// Events raised by actions *during* dispatch are not run inline (which
/// would interleave exit/entry chains); they are captured, arguments moved
/// into the capture, and drained in FIFO order once the outermost dispatch
/// finishes.
///
/// # Example
///
/// ```rust
/// use state_machine::{Event, StateMachine};
///
/// #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
/// enum Door {
///     Open,
///     Closed,
/// }
///
/// let close: Event<()> = Event::new();
/// let open: Event<()> = Event::new();
///
/// let machine = StateMachine::new(Door::Open);
/// machine.on_transition(Door::Open, Door::Closed, &close);
/// machine.on_transition(Door::Closed, Door::Open, &open);
///
/// machine.handle(&close, ());
/// assert_eq!(machine.state(), Door::Closed);
/// ```
pub struct StateMachine<S: StateId> {
    sink: Rc<dyn DiagnosticSink>,

    /// The currently active state.
    current: Cell<S>,

    /// Child to parent; acyclic by construction (`set_parent` refuses
    /// cycles).
    parents: RefCell<HashMap<S, S>>,

    /// `(source, event)` to its transitions, in registration order.
    transitions: RefCell<HashMap<(S, EventId), Vec<TransitionRecord<S>>>>,

    entry_actions: RefCell<HashMap<S, Rc<StoredHook<S>>>>,
    exit_actions: RefCell<HashMap<S, Rc<StoredHook<S>>>>,

    /// Set when the initial entry chain has run; configuration is rejected
    /// afterwards.
    initial_entered: Cell<bool>,

    /// Dispatch nesting depth. Anything raised at depth > 1 is deferred.
    depth: Cell<usize>,

    /// Deferred event invocations, drained FIFO when depth returns to zero.
    pending: RefCell<VecDeque<Box<dyn FnOnce(&StateMachine<S>)>>>,
}

impl<S: StateId> StateMachine<S> {
    /// Creates a machine whose initial state is `initial`, reporting
    /// diagnostics through `tracing`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self::with_sink(initial, Rc::new(TracingSink::new()))
    }

    /// Creates a machine reporting diagnostics to the given sink.
    #[must_use]
    pub fn with_sink(initial: S, sink: Rc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            current: Cell::new(initial),
            parents: RefCell::new(HashMap::new()),
            transitions: RefCell::new(HashMap::new()),
            entry_actions: RefCell::new(HashMap::new()),
            exit_actions: RefCell::new(HashMap::new()),
            initial_entered: Cell::new(false),
            depth: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    /// Returns the currently active state.
    #[must_use]
    pub fn state(&self) -> S {
        self.current.get()
    }

    /// Starts declaring a transition from `source` to `target` on `event`.
    ///
    /// Chain [`when`](TransitionBuilder::when) and/or
    /// [`invoke`](TransitionBuilder::invoke) on the returned builder; the
    /// declaration commits when the builder goes out of scope. Several
    /// transitions may share a `(source, event)` pair; they are tried in
    /// registration order.
    ///
    /// A transition to the source itself exits and re-enters the state;
    /// for an action without exit/entry see
    /// [`on_internal`](Self::on_internal).
    pub fn on_transition<A: 'static>(
        &self,
        source: S,
        target: S,
        event: &Event<A>,
    ) -> TransitionBuilder<'_, S, A> {
        TransitionBuilder::new(self, source, target, event.id(), false)
    }

    /// Starts declaring an internal transition in `state` on `event`: its
    /// action runs without any exit or entry and the state is unchanged.
    pub fn on_internal<A: 'static>(&self, state: S, event: &Event<A>) -> TransitionBuilder<'_, S, A> {
        TransitionBuilder::new(self, state, state, event.id(), true)
    }

    /// Starts declaring the entry action of `state` (at most one).
    pub fn on_entry(&self, state: S) -> ActionBuilder<'_, S> {
        ActionBuilder::new(self, state, ActionKind::Entry)
    }

    /// Starts declaring the exit action of `state` (at most one).
    pub fn on_exit(&self, state: S) -> ActionBuilder<'_, S> {
        ActionBuilder::new(self, state, ActionKind::Exit)
    }

    /// Makes `parent` the parent of `child` in the state hierarchy.
    ///
    /// Self-parenting, cycles, and reassigning an existing parent are
    /// reported to the diagnostic sink and ignored.
    pub fn set_parent(&self, parent: S, child: S) {
        if parent == child {
            self.sink
                .report(&format!("cannot make state {child:?} its own parent"));
            return;
        }

        if self.ancestors(parent).contains(&child) {
            self.sink.report(&format!(
                "cannot set {parent:?} as parent of {child:?}: the hierarchy would become cyclic"
            ));
            return;
        }

        let mut parents = self.parents.borrow_mut();
        if let Some(existing) = parents.get(&child) {
            self.sink.report(&format!(
                "state {child:?} already has parent {existing:?}; keeping it"
            ));
            return;
        }

        parents.insert(child, parent);
    }

    /// Makes `parent` the parent of each of `children`.
    pub fn set_parents(&self, parent: S, children: impl IntoIterator<Item = S>) {
        for child in children {
            self.set_parent(parent, child);
        }
    }

    /// Runs the entry chain of the initial state's ancestors, outermost to
    /// innermost, and freezes configuration.
    ///
    /// Idempotent; also runs lazily before the first handled event.
    pub fn enter_initial_state(&self) {
        if self.initial_entered.get() {
            return;
        }
        self.initial_entered.set(true);

        // Bracket the chain like a dispatch so events raised from entry
        // actions are deferred, not interleaved.
        self.depth.set(self.depth.get() + 1);

        let chain = self.ancestors(self.current.get());
        for state in chain.into_iter().rev() {
            self.run_entry_action(state);
        }

        self.depth.set(self.depth.get() - 1);

        if self.depth.get() == 0 {
            self.drain_pending();
        }
    }

    /// Handles `event` with `args`.
    ///
    /// Resolution walks the current state's ancestors from the inside out;
    /// within one `(state, event)` key, transitions are tried in
    /// registration order and the first whose guard passes (or which has
    /// none) wins. An event nobody handles is a diagnostic; the state is
    /// unchanged.
    ///
    /// When called from within an action on the same machine, the
    /// invocation is captured (taking ownership of `args`) and dispatched
    /// after the current event completes.
    pub fn handle<A: 'static>(&self, event: &Event<A>, args: A) {
        self.enter_initial_state();

        self.depth.set(self.depth.get() + 1);
        if self.depth.get() > 1 {
            let id = event.id();
            self.pending
                .borrow_mut()
                .push_back(Box::new(move |machine: &StateMachine<S>| {
                    machine.execute(id, &args);
                }));
            return;
        }

        self.execute(event.id(), &args);
        self.drain_pending();

        debug_assert_eq!(self.depth.get(), 0, "dispatch depth must return to zero");
    }

    /// Dispatches one event invocation. Decrements the depth counter on
    /// every path out.
    fn execute<A: 'static>(&self, event_id: EventId, args: &A) {
        let Some(transition) = self.find_transition(event_id, args) else {
            self.sink.report(&format!(
                "unhandled event {event_id:?} in state {:?}",
                self.current.get()
            ));
            self.depth.set(self.depth.get() - 1);
            return;
        };

        let source = self.current.get();
        let target = transition.target;

        if !transition.internal {
            for state in self.path_to_common_ancestor(source, target) {
                self.run_exit_action(state);
            }
        }

        if let Some(action) = &transition.action {
            let action = action
                .downcast_ref::<StoredAction<S, A>>()
                .expect("a stored action's argument type always matches its event identity");
            (action.0)(self, args);
        }

        if !transition.internal {
            self.current.set(target);

            let entries = self.path_to_common_ancestor(target, source);
            for state in entries.into_iter().rev() {
                self.run_entry_action(state);
            }
        }

        self.depth.set(self.depth.get() - 1);
    }

    /// Finds the first transition for `event_id` whose guard passes,
    /// walking the current state's ancestors from the inside out.
    fn find_transition<A: 'static>(
        &self,
        event_id: EventId,
        args: &A,
    ) -> Option<TransitionRecord<S>> {
        for ancestor in self.ancestors(self.current.get()) {
            // Clone the candidate list out so no table borrow is held
            // while user guards run (a guard may touch the machine).
            let candidates: Vec<TransitionRecord<S>> = self
                .transitions
                .borrow()
                .get(&(ancestor, event_id))
                .map(|records| records.to_vec())
                .unwrap_or_default();

            for record in candidates {
                if self.guard_passes(&record, args) {
                    return Some(record);
                }
            }
        }

        None
    }

    /// Evaluates a transition's guard; a missing guard passes and a
    /// panicking guard fails.
    fn guard_passes<A: 'static>(&self, record: &TransitionRecord<S>, args: &A) -> bool {
        let Some(guard) = &record.guard else {
            return true;
        };

        let guard = guard
            .downcast_ref::<StoredGuard<A>>()
            .expect("a stored guard's argument type always matches its event identity");

        catch_unwind(AssertUnwindSafe(|| (guard.0)(args))).unwrap_or(false)
    }

    /// Drains deferred invocations FIFO. Draining may defer more; the loop
    /// runs until the queue is empty.
    fn drain_pending(&self) {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some(invocation) => invocation(self),
                None => break,
            }
        }
    }

    /// Returns `state` followed by its ancestors, innermost first.
    fn ancestors(&self, state: S) -> Vec<S> {
        let parents = self.parents.borrow();

        let mut chain = vec![state];
        let mut cursor = state;
        while let Some(&parent) = parents.get(&cursor) {
            chain.push(parent);
            cursor = parent;
        }

        chain
    }

    /// Returns the ancestors of `state` (including itself) up to, but
    /// excluding, the nearest ancestor shared with `reference`.
    ///
    /// When the two are equal the result is just `[state]`: a
    /// self-transition exits and re-enters its own state.
    fn path_to_common_ancestor(&self, state: S, reference: S) -> Vec<S> {
        if state == reference {
            return vec![state];
        }

        let reference_ancestors = self.ancestors(reference);

        let mut path = Vec::new();
        for ancestor in self.ancestors(state) {
            if reference_ancestors.contains(&ancestor) {
                return path;
            }
            path.push(ancestor);
        }

        path
    }

    fn run_entry_action(&self, state: S) {
        let hook = self.entry_actions.borrow().get(&state).cloned();
        if let Some(hook) = hook {
            (hook.0)(self);
        }
    }

    fn run_exit_action(&self, state: S) {
        let hook = self.exit_actions.borrow().get(&state).cloned();
        if let Some(hook) = hook {
            (hook.0)(self);
        }
    }

    pub(crate) fn commit_transition(
        &self,
        source: S,
        event_id: EventId,
        record: TransitionRecord<S>,
    ) {
        if self.initial_entered.get() {
            self.sink
                .report("ignoring a transition registered after the initial state entry");
            return;
        }

        self.transitions
            .borrow_mut()
            .entry((source, event_id))
            .or_default()
            .push(record);
    }

    pub(crate) fn commit_action(&self, state: S, kind: ActionKind, hook: Rc<StoredHook<S>>) {
        if self.initial_entered.get() {
            self.sink
                .report("ignoring an action registered after the initial state entry");
            return;
        }

        let mut actions = match kind {
            ActionKind::Entry => self.entry_actions.borrow_mut(),
            ActionKind::Exit => self.exit_actions.borrow_mut(),
        };

        match actions.entry(state) {
            Entry::Occupied(_) => {
                let which = match kind {
                    ActionKind::Entry => "entry",
                    ActionKind::Exit => "exit",
                };
                self.sink.report(&format!(
                    "duplicate {which} action for state {state:?}; keeping the first"
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(hook);
            }
        }
    }
}

impl<S: StateId> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current.get())
            .field("initial_entered", &self.initial_entered.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use diagnostics::MemorySink;
    use static_assertions::assert_not_impl_any;

    use super::*;

    // One machine instance is single-threaded by design.
    assert_not_impl_any!(StateMachine<u8>: Send, Sync);

    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    enum S {
        Root,
        Leaf,
        Other,
    }

    fn sinked(initial: S) -> (StateMachine<S>, Rc<MemorySink>) {
        let sink = Rc::new(MemorySink::new());
        let machine = StateMachine::with_sink(initial, Rc::clone(&sink) as Rc<dyn DiagnosticSink>);
        (machine, sink)
    }

    #[test]
    fn simple_transition_changes_state() {
        let go: Event<()> = Event::new();

        let (machine, sink) = sinked(S::Leaf);
        machine.on_transition(S::Leaf, S::Other, &go);

        machine.handle(&go, ());

        assert_eq!(machine.state(), S::Other);
        assert!(sink.is_empty());
    }

    #[test]
    fn unhandled_event_reports_and_keeps_state() {
        let go: Event<()> = Event::new();
        let other: Event<()> = Event::new();

        let (machine, sink) = sinked(S::Leaf);
        machine.on_transition(S::Leaf, S::Other, &go);

        machine.handle(&other, ());

        assert_eq!(machine.state(), S::Leaf);
        assert!(sink.contains("unhandled event"));
    }

    #[test]
    fn guard_selects_among_registrations() {
        let go: Event<i32> = Event::new();

        let (machine, _sink) = sinked(S::Leaf);
        machine
            .on_transition(S::Leaf, S::Other, &go)
            .when(|value| *value > 0);
        machine.on_transition(S::Leaf, S::Root, &go);

        machine.handle(&go, -1);
        assert_eq!(machine.state(), S::Root);
    }

    #[test]
    fn registration_order_breaks_ties() {
        let go: Event<()> = Event::new();

        let (machine, _sink) = sinked(S::Leaf);
        machine.on_transition(S::Leaf, S::Other, &go);
        machine.on_transition(S::Leaf, S::Root, &go);

        machine.handle(&go, ());
        assert_eq!(machine.state(), S::Other);
    }

    #[test]
    fn panicking_guard_counts_as_false() {
        let go: Event<()> = Event::new();

        let (machine, _sink) = sinked(S::Leaf);
        machine
            .on_transition(S::Leaf, S::Other, &go)
            .when(|_: &()| panic!("guard blew up"));
        machine.on_transition(S::Leaf, S::Root, &go);

        machine.handle(&go, ());
        assert_eq!(machine.state(), S::Root);
    }

    #[test]
    fn self_parent_is_rejected() {
        let (machine, sink) = sinked(S::Leaf);

        machine.set_parent(S::Leaf, S::Leaf);

        assert!(sink.contains("its own parent"));
    }

    #[test]
    fn cyclic_parent_is_rejected() {
        let (machine, sink) = sinked(S::Leaf);

        machine.set_parent(S::Root, S::Leaf);
        machine.set_parent(S::Leaf, S::Root);

        assert!(sink.contains("cyclic"));
    }

    #[test]
    fn duplicate_parent_keeps_existing() {
        let (machine, sink) = sinked(S::Leaf);

        machine.set_parent(S::Root, S::Leaf);
        machine.set_parent(S::Other, S::Leaf);

        assert!(sink.contains("already has parent"));

        // The original mapping still resolves events registered on Root.
        let go: Event<()> = Event::new();
        machine.on_transition(S::Root, S::Other, &go);
        machine.handle(&go, ());
        assert_eq!(machine.state(), S::Other);
    }

    #[test]
    fn configuration_after_initial_entry_is_ignored() {
        let go: Event<()> = Event::new();

        let (machine, sink) = sinked(S::Leaf);
        machine.enter_initial_state();

        machine.on_transition(S::Leaf, S::Other, &go);
        assert!(sink.contains("after the initial state entry"));

        machine.handle(&go, ());
        assert_eq!(machine.state(), S::Leaf);
    }

    #[test]
    fn initial_entry_is_idempotent() {
        let entries = Rc::new(RefCell::new(0));

        let (machine, _sink) = sinked(S::Leaf);
        {
            let entries = Rc::clone(&entries);
            machine.on_entry(S::Leaf).invoke(move |_| {
                *entries.borrow_mut() += 1;
            });
        }

        machine.enter_initial_state();
        machine.enter_initial_state();

        assert_eq!(*entries.borrow(), 1);
    }

    #[test]
    fn move_only_arguments_are_supported() {
        let go: Event<Box<i32>> = Event::new();
        let seen = Rc::new(RefCell::new(0));

        let (machine, _sink) = sinked(S::Leaf);
        {
            let seen = Rc::clone(&seen);
            machine
                .on_transition(S::Leaf, S::Other, &go)
                .invoke(move |_, value: &Box<i32>| {
                    *seen.borrow_mut() = **value;
                });
        }

        machine.handle(&go, Box::new(77));

        assert_eq!(*seen.borrow(), 77);
        assert_eq!(machine.state(), S::Other);
    }
}
