use std::{collections::VecDeque, fmt, str::FromStr};

use crate::errors::ConfigError;

pub const DEFAULT_STASH_CAPACITY: usize = 1000;

/// What to do with a command that arrives while the stash is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StashOverflow {
    /// Refuse the command; an asking caller gets
    /// [`RequestError::Rejected`](crate::errors::RequestError::Rejected).
    #[default]
    Reject,
    /// Leave further commands in the mailbox until the in-flight persist
    /// completes.
    Block,
    /// Fail the instance and let the supervisor strategy decide.
    Fail,
}

/// Bounded FIFO of deferred commands.
#[derive(Debug)]
pub struct Stash<T> {
    items: VecDeque<T>,
    capacity: usize,
    overflow: StashOverflow,
}

// Implementations

impl<T> Stash<T> {
    pub fn new(capacity: usize, overflow: StashOverflow) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            overflow,
        }
    }

    /// Append at the back, handing the item back when the stash is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }

        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove every item, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> StashOverflow {
        self.overflow
    }
}

impl<T> Default for Stash<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STASH_CAPACITY, StashOverflow::default())
    }
}

impl FromStr for StashOverflow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(StashOverflow::Reject),
            "block" => Ok(StashOverflow::Block),
            "fail" => Ok(StashOverflow::Fail),
            _ => Err(ConfigError::InvalidValue {
                key: "stash overflow",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StashOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StashOverflow::Reject => write!(f, "reject"),
            StashOverflow::Block => write!(f, "block"),
            StashOverflow::Fail => write!(f, "fail"),
        }
    }
}
