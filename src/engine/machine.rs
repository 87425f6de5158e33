//! Generic event-dispatch state machine.
//!
//! A strategy is a transition table: `(state, event) -> handler`. Handlers
//! receive the machine itself so they can transition state and dispatch
//! further events, chaining through states until a handler returns without
//! dispatching again.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use futures::future::BoxFuture;
use tracing::error;

/// An async handler in the transition table. Receives the machine (for
/// reentrant `change_state`/`dispatch`), the strategy context, and the event
/// payload.
pub type Handler<S, E, P, Cx> =
    for<'a> fn(&'a mut Machine<S, E, P, Cx>, &'a Cx, P) -> BoxFuture<'a, ()>;

/// Transition table mapping `(state, event)` to a handler.
pub type Transitions<S, E, P, Cx> = HashMap<(S, E), Handler<S, E, P, Cx>>;

/// Finite-state executor for one strategy invocation. Constructed fresh per
/// scheduled run and discarded once the dispatch chain settles.
pub struct Machine<S, E, P, Cx> {
    state: S,
    transitions: Transitions<S, E, P, Cx>,
}

impl<S, E, P, Cx> Machine<S, E, P, Cx>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(transitions: Transitions<S, E, P, Cx>, initial: S) -> Self {
        Self {
            state: initial,
            transitions,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    /// Unconditionally replace the current state. No validation against the
    /// table; an unknown state simply yields "handler not found" on the next
    /// dispatch.
    pub fn change_state(&mut self, new_state: S) {
        self.state = new_state;
    }

    /// Look up and invoke the handler for `(current_state, event)`.
    ///
    /// A missing handler logs a diagnostic and resolves immediately — a
    /// recoverable no-op, never a panic. The handler's future is returned
    /// un-awaited; callers that need sequencing await the returned future
    /// themselves.
    pub fn dispatch<'a>(&'a mut self, event: E, cx: &'a Cx, payload: P) -> BoxFuture<'a, ()> {
        let handler = self.transitions.get(&(self.state, event)).copied();
        match handler {
            Some(handler) => handler(self, cx, payload),
            None => {
                error!(state = ?self.state, event = ?event, "handler not found for state/event");
                Box::pin(async {})
            }
        }
    }
}
