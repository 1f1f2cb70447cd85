use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Identity of one event stream.
///
/// The same id must always refer to the same logical entity; the event log and
/// the snapshot store key everything by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersistenceId(Arc<str>);

impl PersistenceId {
    /// Separator between the entity type hint and the entity id.
    pub const SEPARATOR: char = '|';

    pub fn new(id: impl AsRef<str>) -> Result<Self, ConfigError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(ConfigError::EmptyPersistenceId);
        }

        Ok(Self(Arc::from(id)))
    }

    /// Build `"{type_hint}|{entity_id}"`, the conventional shape for entities
    /// that share one journal across several types.
    pub fn of(type_hint: &str, entity_id: &str) -> Result<Self, ConfigError> {
        if type_hint.contains(Self::SEPARATOR) {
            return Err(ConfigError::SeparatorInTypeHint(type_hint.to_string()));
        }
        if type_hint.is_empty() || entity_id.is_empty() {
            return Err(ConfigError::EmptyPersistenceId);
        }

        Ok(Self(Arc::from(format!(
            "{type_hint}{}{entity_id}",
            Self::SEPARATOR
        ))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Entity type hint, if the id was built with [`PersistenceId::of`].
    pub fn type_hint(&self) -> Option<&str> {
        self.0.split_once(Self::SEPARATOR).map(|(hint, _)| hint)
    }

    pub fn entity_id(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map_or(self.as_str(), |(_, id)| id)
    }
}

impl fmt::Display for PersistenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PersistenceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of() {
        let id = PersistenceId::of("ShoppingCart", "42").unwrap();
        assert_eq!(id.as_str(), "ShoppingCart|42");
        assert_eq!(id.type_hint(), Some("ShoppingCart"));
        assert_eq!(id.entity_id(), "42");
    }

    #[test]
    fn test_plain_id() {
        let id = PersistenceId::new("counter-1").unwrap();
        assert_eq!(id.type_hint(), None);
        assert_eq!(id.entity_id(), "counter-1");
        assert_eq!(id.to_string(), "counter-1");
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert_eq!(
            PersistenceId::new(""),
            Err(ConfigError::EmptyPersistenceId)
        );
        assert_eq!(
            PersistenceId::of("a|b", "1"),
            Err(ConfigError::SeparatorInTypeHint("a|b".into()))
        );
        assert_eq!(
            PersistenceId::of("Cart", ""),
            Err(ConfigError::EmptyPersistenceId)
        );
    }
}
