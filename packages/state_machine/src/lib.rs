//! A hierarchical, event-driven finite-state machine.
//!
//! [`StateMachine`] runs over a client-supplied set of state identifiers
//! (typically an enumeration) and typed [`Event`] handles. It supports:
//!
//! - transitions between states on events, with optional guard conditions
//!   and transition actions;
//! - state-internal transitions (action only, no exit/entry);
//! - state entry and exit actions;
//! - state hierarchy: an event unhandled in the current state is offered to
//!   its ancestors, and a transition's exit/entry chains run exactly up to
//!   the nearest common ancestor of source and destination;
//! - recursive events: an event raised by an action on the same machine is
//!   captured and dispatched, FIFO, after the current event completes, so
//!   exit/entry sequences never interleave. Because of this capture, event
//!   arguments must be ownable values (moved into the capture); guards and
//!   actions receive them by reference.
//!
//! Configuration happens through builder calls and freezes at the initial
//! state entry; afterwards the machine is read-only apart from its current
//! state, and a single instance is strictly single-threaded.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use state_machine::{Event, StateMachine};
//!
//! #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
//! enum Player {
//!     Stopped,
//!     Playing,
//! }
//!
//! let play: Event<String> = Event::new();
//! let stop: Event<()> = Event::new();
//!
//! let now_playing = Rc::new(RefCell::new(String::new()));
//!
//! let machine = StateMachine::new(Player::Stopped);
//! {
//!     let now_playing = Rc::clone(&now_playing);
//!     machine
//!         .on_transition(Player::Stopped, Player::Playing, &play)
//!         .invoke(move |_machine, track| {
//!             *now_playing.borrow_mut() = track.clone();
//!         });
//! }
//! machine.on_transition(Player::Playing, Player::Stopped, &stop);
//!
//! machine.handle(&play, "track one".to_string());
//! assert_eq!(machine.state(), Player::Playing);
//! assert_eq!(now_playing.borrow().as_str(), "track one");
//!
//! machine.handle(&stop, ());
//! assert_eq!(machine.state(), Player::Stopped);
//! ```

mod builder;
mod event;
mod machine;

pub use builder::{ActionBuilder, TransitionBuilder};
pub use event::{Event, EventId};
pub use machine::{StateId, StateMachine};
