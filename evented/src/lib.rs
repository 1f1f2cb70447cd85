//! Event-sourced persistent actors on tokio.
//!
//! An [`EventSourcedBehavior`](behavior::EventSourcedBehavior) pairs a command
//! handler producing [`Effect`](effect::Effect)s with an event handler folding
//! persisted events into state. [`RootContext::spawn`](context::RootContext::spawn)
//! runs it as an actor that recovers from its journal and snapshot store before
//! processing commands one at a time.

pub mod actor_instance;
pub mod actor_ref;
pub mod base;
pub mod behavior;
pub mod config;
pub mod context;
pub mod effect;
pub mod errors;
pub mod handler;
pub mod journal;
pub mod message;
pub mod persistence_id;
pub mod recovery;
pub mod retention;
pub mod scheduler;
pub mod signal;
pub mod snapshot;
pub mod stash;
pub mod status;
pub mod supervision;

// Re-exports

pub mod prelude {
    pub use crate::actor_ref::PersistentRef;
    pub use crate::base::SequenceNr;
    pub use crate::behavior::EventSourcedBehavior;
    pub use crate::config::PersistenceConfig;
    pub use crate::context::RootContext;
    pub use crate::effect::Effect;
    pub use crate::errors::{PersistenceError, RequestError, SendError, StoreError};
    pub use crate::handler::{CommandHandler, EventHandler};
    pub use crate::message::Outcome;
    pub use crate::persistence_id::PersistenceId;
    pub use crate::recovery::Recovery;
    pub use crate::retention::RetentionCriteria;
    pub use crate::signal::Signal;
    pub use crate::stash::StashOverflow;
    pub use crate::status::Status;
    pub use crate::supervision::SupervisorStrategy;
}
