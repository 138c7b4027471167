//! Store configuration module.
//!
//! Loads the settings for the `blocktree` binary from environment variables.
//!
//! # Environment Variables
//!
//! - `BLOCKTREE_PATH`: Store file (default: `./data/blocktree.db`)
//! - `BLOCKTREE_GROWTH_BLOCKS`: Blocks added per growth step and initial size
//!   of a new store (default: `1024`, minimum `2`)
//! - `BLOCKTREE_CACHE_NODES`: Decoded nodes kept in memory (default: `256`,
//!   minimum `1`)

use std::path::PathBuf;

use crate::storage::StoreOptions;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the store file. Its parent directory may not exist yet.
    pub path: PathBuf,
    pub growth_blocks: u64,
    pub cache_nodes: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    pub const DEFAULT_PATH: &'static str = "./data/blocktree.db";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BLOCKTREE_GROWTH_BLOCKS` or `BLOCKTREE_CACHE_NODES`
    /// is set but not a number at or above its minimum.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = lookup("BLOCKTREE_PATH")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_PATH), PathBuf::from);

        let growth_blocks = parse_at_least(
            "BLOCKTREE_GROWTH_BLOCKS",
            lookup("BLOCKTREE_GROWTH_BLOCKS"),
            2,
            StoreOptions::DEFAULT_GROWTH_BLOCKS,
        )?;

        let cache_nodes = parse_at_least(
            "BLOCKTREE_CACHE_NODES",
            lookup("BLOCKTREE_CACHE_NODES"),
            1,
            StoreOptions::DEFAULT_CACHE_NODES,
        )?;

        Ok(Self {
            path,
            growth_blocks,
            cache_nodes,
        })
    }

    /// The options to open the store with.
    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        StoreOptions {
            growth_blocks: self.growth_blocks,
            cache_nodes: self.cache_nodes,
        }
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset.
fn parse_at_least<T>(
    name: &str,
    value: Option<String>,
    minimum: T,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
{
    let Some(value) = value else {
        return Ok(default);
    };

    match value.trim().parse::<T>() {
        Ok(parsed) if parsed >= minimum => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a whole number of at least {minimum}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StoreConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config.path, PathBuf::from("./data/blocktree.db"));
        assert_eq!(config.options(), StoreOptions::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BLOCKTREE_PATH", "/tmp/keys.db"),
            ("BLOCKTREE_GROWTH_BLOCKS", "64"),
            ("BLOCKTREE_CACHE_NODES", "8"),
        ])
        .expect("overrides");

        assert_eq!(config.path, PathBuf::from("/tmp/keys.db"));
        assert_eq!(config.options(), StoreOptions {
            growth_blocks: 64,
            cache_nodes: 8,
        });
    }

    #[test]
    fn test_rejects_values_below_minimum() {
        let error = load(&[("BLOCKTREE_GROWTH_BLOCKS", "1")]).expect_err("too small");
        assert_eq!(
            error.to_string(),
            "invalid value for BLOCKTREE_GROWTH_BLOCKS: '1' is not a whole number of at least 2"
        );

        assert!(load(&[("BLOCKTREE_CACHE_NODES", "0")]).is_err());
    }

    #[test]
    fn test_rejects_non_numeric() {
        let error = load(&[("BLOCKTREE_CACHE_NODES", "lots")]).expect_err("not a number");
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "BLOCKTREE_CACHE_NODES"));
    }
}
