//! Runtime settings shared by every actor spawned from one
//! [`RootContext`](crate::context::RootContext).

use std::path::PathBuf;

use crate::{
    errors::ConfigError,
    stash::{DEFAULT_STASH_CAPACITY, StashOverflow},
};

#[cfg(feature = "local_fs")]
use crate::warn;

pub const ENV_STASH_CAPACITY: &str = "EVENTED_STASH_CAPACITY";
pub const ENV_STASH_OVERFLOW: &str = "EVENTED_STASH_OVERFLOW";
pub const ENV_DATA_DIR: &str = "EVENTED_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Commands buffered while a persist is in flight, and the limit of the
    /// user stash.
    pub stash_capacity: usize,
    pub stash_overflow: StashOverflow,
    /// Root of the local file stores.
    pub data_dir: PathBuf,
}

impl PersistenceConfig {
    pub fn with_stash_capacity(mut self, capacity: usize) -> Self {
        self.stash_capacity = capacity;
        self
    }

    pub fn with_stash_overflow(mut self, overflow: StashOverflow) -> Self {
        self.stash_overflow = overflow;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Defaults overridden by `EVENTED_*` environment variables. Blank
    /// variables are ignored, malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(raw) = var(ENV_STASH_CAPACITY) {
            config.stash_capacity = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_STASH_CAPACITY,
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = var(ENV_STASH_OVERFLOW) {
            config.stash_overflow = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_STASH_OVERFLOW,
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = var(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(raw);
        }

        Ok(config)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            stash_capacity: DEFAULT_STASH_CAPACITY,
            stash_overflow: StashOverflow::default(),
            data_dir: default_data_dir(),
        }
    }
}

#[cfg(feature = "local_fs")]
fn default_data_dir() -> PathBuf {
    match directories::ProjectDirs::from("rs", "evented", "evented") {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => {
            warn!("no home directory found, storing data under the working directory");
            PathBuf::from("evented-data")
        }
    }
}

#[cfg(not(feature = "local_fs"))]
fn default_data_dir() -> PathBuf {
    PathBuf::from("evented-data")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PersistenceConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.stash_capacity, 1000);
        assert_eq!(config.stash_overflow, StashOverflow::Reject);
        assert_eq!(config, PersistenceConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = PersistenceConfig::from_lookup(lookup(&[
            (ENV_STASH_CAPACITY, "16"),
            (ENV_STASH_OVERFLOW, "block"),
            (ENV_DATA_DIR, "/var/lib/evented"),
        ]))
        .unwrap();

        assert_eq!(config.stash_capacity, 16);
        assert_eq!(config.stash_overflow, StashOverflow::Block);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/evented"));

        let blank = PersistenceConfig::from_lookup(lookup(&[(ENV_STASH_CAPACITY, "  ")])).unwrap();
        assert_eq!(blank.stash_capacity, 1000);
    }

    #[test]
    fn test_malformed() {
        let err = PersistenceConfig::from_lookup(lookup(&[(ENV_STASH_CAPACITY, "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_STASH_CAPACITY,
                value: "many".into()
            }
        );

        assert!(
            PersistenceConfig::from_lookup(lookup(&[(ENV_STASH_OVERFLOW, "drop")])).is_err()
        );
    }

    #[test]
    fn test_builder() {
        let config = PersistenceConfig::default()
            .with_stash_capacity(4)
            .with_stash_overflow(StashOverflow::Fail)
            .with_data_dir("/tmp/x");

        assert_eq!(config.stash_capacity, 4);
        assert_eq!(config.stash_overflow, StashOverflow::Fail);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
    }
}
