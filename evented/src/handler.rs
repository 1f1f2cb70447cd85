//! Command and event handlers as ordered, first-match rule lists.
//!
//! Each rule pairs a predicate over the current state with a predicate over the
//! incoming command (or event). Rules are tried in the order they were added and
//! the first one whose predicates both hold is used.
//!
//! ```
//! use evented::{effect::Effect, handler::{CommandHandler, EventHandler}};
//!
//! enum Cmd { Add(String), Clear }
//! enum Evt { Added(String), Cleared }
//!
//! let commands = CommandHandler::<Cmd, Evt, Vec<String>>::builder()
//!     .for_state(|s: &Vec<String>| s.is_empty())
//!     .on_command(|c| matches!(c, Cmd::Clear), |_, _| Effect::unhandled())
//!     .for_any_state()
//!     .on_command(|c| matches!(c, Cmd::Add(_)), |_, c| match c {
//!         Cmd::Add(item) => Effect::persist(Evt::Added(item)),
//!         Cmd::Clear => Effect::persist(Evt::Cleared),
//!     })
//!     .on_command(|c| matches!(c, Cmd::Clear), |_, _| Effect::persist(Evt::Cleared))
//!     .build();
//!
//! let events = EventHandler::<Evt, Vec<String>>::builder()
//!     .on_any_event(|s, e| match e {
//!         Evt::Added(item) => [vec![item.clone()], s.clone()].concat(),
//!         Evt::Cleared => Vec::new(),
//!     })
//!     .build();
//!
//! assert!(commands.handle(&Vec::new(), Cmd::Clear).is_unhandled());
//! assert_eq!(events.apply(&Vec::new(), &Evt::Added("x".into())), Some(vec!["x".to_string()]));
//! ```

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use crate::{
    base::{SequenceNr, panic_msg},
    effect::Effect,
    errors::PersistenceError,
};

type StatePredicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;
type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type CommandFn<C, E, S> = Box<dyn Fn(&S, C) -> Effect<E, S> + Send + Sync>;
type EventFn<E, S> = Box<dyn Fn(&S, &E) -> S + Send + Sync>;

pub struct CommandHandler<C, E, S> {
    rules: Vec<CommandRule<C, E, S>>,
}

pub struct CommandHandlerBuilder<C, E, S> {
    rules: Vec<CommandRule<C, E, S>>,
    current_state: StatePredicate<S>,
}

struct CommandRule<C, E, S> {
    state: StatePredicate<S>,
    command: Predicate<C>,
    action: RuleAction<C, E, S>,
}

enum RuleAction<C, E, S> {
    Handle(CommandFn<C, E, S>),
    Stash,
}

/// Where a command goes after rule matching.
pub enum Dispatch<C, E, S> {
    Effect(Effect<E, S>),
    /// Deferred until an effect unstashes; the command is handed back intact.
    Stash(C),
}

pub struct EventHandler<E, S> {
    rules: Vec<EventRule<E, S>>,
}

pub struct EventHandlerBuilder<E, S> {
    rules: Vec<EventRule<E, S>>,
    current_state: StatePredicate<S>,
}

struct EventRule<E, S> {
    state: StatePredicate<S>,
    event: Predicate<E>,
    handler: EventFn<E, S>,
}

// Implementations

impl<C, E, S> CommandHandler<C, E, S>
where
    S: 'static,
{
    pub fn builder() -> CommandHandlerBuilder<C, E, S> {
        CommandHandlerBuilder {
            rules: Vec::new(),
            current_state: any_state(),
        }
    }

    /// A handler made of a single rule matching every state and command.
    pub fn from_fn<F>(f: F) -> Self
    where
        C: 'static,
        F: Fn(&S, C) -> Effect<E, S> + Send + Sync + 'static,
    {
        Self::builder().on_any_command(f).build()
    }

    /// Dispatch to the first matching rule. No match means the command is
    /// unhandled in this state.
    pub fn handle(&self, state: &S, command: C) -> Dispatch<C, E, S> {
        match self
            .rules
            .iter()
            .find(|r| (r.state)(state) && (r.command)(&command))
            .map(|r| &r.action)
        {
            Some(RuleAction::Handle(handler)) => Dispatch::Effect(handler(state, command)),
            Some(RuleAction::Stash) => Dispatch::Stash(command),
            None => Dispatch::Effect(Effect::unhandled()),
        }
    }
}

impl<C, E, S> CommandHandlerBuilder<C, E, S>
where
    S: 'static,
{
    /// Following rules apply regardless of state.
    pub fn for_any_state(mut self) -> Self {
        self.current_state = any_state();
        self
    }

    /// Following rules apply only while `pred` holds for the current state.
    pub fn for_state<P>(mut self, pred: P) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.current_state = Arc::new(pred);
        self
    }

    pub fn on_command<P, F>(mut self, pred: P, handler: F) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
        F: Fn(&S, C) -> Effect<E, S> + Send + Sync + 'static,
    {
        self.rules.push(CommandRule {
            state: self.current_state.clone(),
            command: Box::new(pred),
            action: RuleAction::Handle(Box::new(handler)),
        });
        self
    }

    /// Defer matching commands until an effect calls
    /// [`then_unstash_all`](Effect::then_unstash_all).
    pub fn stash_command<P>(mut self, pred: P) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.rules.push(CommandRule {
            state: self.current_state.clone(),
            command: Box::new(pred),
            action: RuleAction::Stash,
        });
        self
    }

    pub fn on_any_command<F>(self, handler: F) -> Self
    where
        C: 'static,
        F: Fn(&S, C) -> Effect<E, S> + Send + Sync + 'static,
    {
        self.on_command(|_| true, handler)
    }

    pub fn build(self) -> CommandHandler<C, E, S> {
        CommandHandler { rules: self.rules }
    }
}

impl<E, S> EventHandler<E, S>
where
    S: 'static,
{
    pub fn builder() -> EventHandlerBuilder<E, S> {
        EventHandlerBuilder {
            rules: Vec::new(),
            current_state: any_state(),
        }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        E: 'static,
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        Self::builder().on_any_event(f).build()
    }

    /// Fold one event into the state. `None` when no rule accepts the event,
    /// which for an already persisted event means the stream is unreadable.
    pub fn apply(&self, state: &S, event: &E) -> Option<S> {
        self.rules
            .iter()
            .find(|r| (r.state)(state) && (r.event)(event))
            .map(|rule| (rule.handler)(state, event))
    }

    /// [`apply`](EventHandler::apply) for an event that is already persisted
    /// at `sequence_nr`. Both a missing rule and a panic mean the stream can
    /// not be folded.
    pub(crate) fn fold(
        &self,
        state: &S,
        event: &E,
        sequence_nr: SequenceNr,
    ) -> Result<S, PersistenceError> {
        match catch_unwind(AssertUnwindSafe(|| self.apply(state, event))) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => Err(PersistenceError::EventHandler {
                sequence_nr,
                reason: "no rule accepts the event in the current state".into(),
            }),
            Err(e) => Err(PersistenceError::EventHandler {
                sequence_nr,
                reason: panic_msg(e),
            }),
        }
    }
}

impl<E, S> EventHandlerBuilder<E, S>
where
    S: 'static,
{
    pub fn for_any_state(mut self) -> Self {
        self.current_state = any_state();
        self
    }

    pub fn for_state<P>(mut self, pred: P) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.current_state = Arc::new(pred);
        self
    }

    pub fn on_event<P, F>(mut self, pred: P, handler: F) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.rules.push(EventRule {
            state: self.current_state.clone(),
            event: Box::new(pred),
            handler: Box::new(handler),
        });
        self
    }

    pub fn on_any_event<F>(self, handler: F) -> Self
    where
        E: 'static,
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.on_event(|_| true, handler)
    }

    pub fn build(self) -> EventHandler<E, S> {
        EventHandler { rules: self.rules }
    }
}

impl<C, E, S> Dispatch<C, E, S> {
    pub fn effect(self) -> Option<Effect<E, S>> {
        match self {
            Dispatch::Effect(effect) => Some(effect),
            Dispatch::Stash(_) => None,
        }
    }

    /// Events the effect would persist; none when stashed.
    pub fn events(&self) -> &[E] {
        match self {
            Dispatch::Effect(effect) => effect.events(),
            Dispatch::Stash(_) => &[],
        }
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, Dispatch::Effect(effect) if effect.is_unhandled())
    }

    pub fn is_stash(&self) -> bool {
        matches!(self, Dispatch::Stash(_))
    }
}

fn any_state<S: 'static>() -> StatePredicate<S> {
    Arc::new(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Light {
        On,
        Off,
    }

    enum Cmd {
        Toggle,
        TurnOn,
    }

    #[derive(Debug, PartialEq)]
    enum Evt {
        Toggled,
    }

    fn commands() -> CommandHandler<Cmd, Evt, Light> {
        CommandHandler::builder()
            .for_state(|s: &Light| *s == Light::On)
            .on_command(|c| matches!(c, Cmd::TurnOn), |_, _| Effect::none())
            .for_any_state()
            .on_command(|c| matches!(c, Cmd::TurnOn), |_, _| {
                Effect::persist(Evt::Toggled)
            })
            .on_command(|c| matches!(c, Cmd::Toggle), |_, _| {
                Effect::persist(Evt::Toggled)
            })
            .build()
    }

    #[test]
    fn test_first_match_wins() {
        let handler = commands();

        assert!(handler.handle(&Light::On, Cmd::TurnOn).events().is_empty());
        assert_eq!(
            handler.handle(&Light::Off, Cmd::TurnOn).events(),
            &[Evt::Toggled]
        );
        assert_eq!(
            handler.handle(&Light::On, Cmd::Toggle).events(),
            &[Evt::Toggled]
        );
    }

    #[test]
    fn test_no_rule_is_unhandled() {
        let handler = CommandHandler::<Cmd, Evt, Light>::builder()
            .on_command(|c| matches!(c, Cmd::Toggle), |_, _| Effect::none())
            .build();

        assert!(handler.handle(&Light::Off, Cmd::TurnOn).is_unhandled());
    }

    #[test]
    fn test_stash_rule_hands_the_command_back() {
        let handler = CommandHandler::<Cmd, Evt, Light>::builder()
            .for_state(|s| *s == Light::Off)
            .stash_command(|c| matches!(c, Cmd::Toggle))
            .for_any_state()
            .on_any_command(|_, _| Effect::persist(Evt::Toggled))
            .build();

        let stashed = handler.handle(&Light::Off, Cmd::Toggle);
        assert!(stashed.is_stash());
        assert!(matches!(stashed, Dispatch::Stash(Cmd::Toggle)));

        let handled = handler.handle(&Light::On, Cmd::Toggle);
        assert!(!handled.is_stash());
        assert_eq!(handled.effect().unwrap().events(), &[Evt::Toggled]);
    }

    #[test]
    fn test_event_rules() {
        let handler = EventHandler::<Evt, Light>::builder()
            .for_state(|s| *s == Light::On)
            .on_any_event(|_, _| Light::Off)
            .for_state(|s| *s == Light::Off)
            .on_any_event(|_, _| Light::On)
            .build();

        assert_eq!(handler.apply(&Light::On, &Evt::Toggled), Some(Light::Off));
        assert_eq!(handler.apply(&Light::Off, &Evt::Toggled), Some(Light::On));

        let empty = EventHandler::<Evt, Light>::builder().build();
        assert_eq!(empty.apply(&Light::On, &Evt::Toggled), None);
    }

    #[test]
    fn test_fold_failures_are_fatal() {
        let empty = EventHandler::<Evt, Light>::builder().build();
        let err = empty.fold(&Light::On, &Evt::Toggled, 7).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, PersistenceError::EventHandler { sequence_nr: 7, .. }));

        let panicking = EventHandler::<Evt, Light>::from_fn(|_, _| panic!("bad event"));
        match panicking.fold(&Light::On, &Evt::Toggled, 2) {
            Err(PersistenceError::EventHandler { reason, .. }) => assert_eq!(reason, "bad event"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
