//! Effects describe what should happen as the result of handling one command.
//!
//! An [`Effect`] is a plain value. Building or composing one performs no I/O;
//! the actor instance executes it after the command handler returns: events are
//! appended first, folded into the state, and only then do the attached side
//! effects run against the resulting state.
//!
//! Deferring a command is not an effect: the command handler declares it per
//! rule with [`stash_command`](crate::handler::CommandHandlerBuilder::stash_command)
//! so the command itself is kept for later.

use std::fmt;

/// Side effect run with the state that results from executing an effect.
pub type Callback<S> = Box<dyn FnOnce(&S) + Send + 'static>;

/// Description of the outcome of handling a single command.
#[must_use = "an effect does nothing unless it is returned from the command handler"]
pub struct Effect<E, S> {
    pub(crate) action: Action<E>,
    pub(crate) side_effects: Vec<SideEffect<S>>,
}

pub(crate) enum Action<E> {
    Persist(Vec<E>),
    None,
    Unhandled,
}

pub(crate) enum SideEffect<S> {
    Callback(Callback<S>),
    Stop,
    UnstashAll,
}

// Implementations

impl<E, S> Effect<E, S> {
    /// Persist a single event.
    pub fn persist(event: E) -> Self {
        Self::from_action(Action::Persist(vec![event]))
    }

    /// Persist all events atomically, in order. An empty list behaves like
    /// [`Effect::none`].
    pub fn persist_all(events: impl IntoIterator<Item = E>) -> Self {
        let events: Vec<E> = events.into_iter().collect();
        if events.is_empty() {
            return Self::none();
        }

        Self::from_action(Action::Persist(events))
    }

    /// Persist nothing; side effects still run.
    pub fn none() -> Self {
        Self::from_action(Action::None)
    }

    /// The command is not handled in the current state. The caller is told so
    /// and the state stays as it is.
    pub fn unhandled() -> Self {
        Self::from_action(Action::Unhandled)
    }

    /// Stop the actor without persisting anything.
    pub fn stop() -> Self {
        Self::none().then_stop()
    }

    /// Re-deliver every stashed command without persisting anything.
    pub fn unstash_all() -> Self {
        Self::none().then_unstash_all()
    }

    /// Run `f` with the resulting state once the events are durable.
    pub fn then_run<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.side_effects.push(SideEffect::Callback(Box::new(f)));
        self
    }

    /// Stop the actor once persisting and the preceding side effects are done.
    pub fn then_stop(mut self) -> Self {
        self.side_effects.push(SideEffect::Stop);
        self
    }

    pub fn then_unstash_all(mut self) -> Self {
        self.side_effects.push(SideEffect::UnstashAll);
        self
    }

    /// Events this effect will persist, in order.
    pub fn events(&self) -> &[E] {
        match &self.action {
            Action::Persist(events) => events,
            _ => &[],
        }
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self.action, Action::Unhandled)
    }

    pub fn stops(&self) -> bool {
        self.side_effects
            .iter()
            .any(|s| matches!(s, SideEffect::Stop))
    }

    fn from_action(action: Action<E>) -> Self {
        Self {
            action,
            side_effects: Vec::new(),
        }
    }
}

impl<E: fmt::Debug, S> fmt::Debug for Effect<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action: &dyn fmt::Debug = match &self.action {
            Action::Persist(events) => events,
            Action::None => &"None",
            Action::Unhandled => &"Unhandled",
        };

        f.debug_struct("Effect")
            .field("action", action)
            .field("side_effects", &self.side_effects.len())
            .field("stops", &self.stops())
            .finish()
    }
}
