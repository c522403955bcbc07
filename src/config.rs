use std::str::FromStr;

use crate::{
    error::{Error, Result},
    index::IndexKind,
};

pub const EXPANSION_FACTOR_ENV_VAR: &str = "VECSTORE_EXPANSION_FACTOR";
pub const INDEX_ENV_VAR: &str = "VECSTORE_INDEX";
pub const RERANK_FACTOR_ENV_VAR: &str = "VECSTORE_RERANK_FACTOR";

pub const DEFAULT_EXPANSION_FACTOR: usize = 3;
pub const DEFAULT_RERANK_FACTOR: usize =
    crate::index::spatial::DEFAULT_RERANK_FACTOR;

/// Tunables shared by the search orchestrator and the store facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Over-fetch multiplier applied to `k` when a metadata filter is present.
    pub expansion_factor: usize,
    /// Index kind used for libraries that never chose one.
    pub default_index: IndexKind,
    /// Candidate pool multiplier for non-Euclidean spatial-tree queries.
    pub rerank_factor: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            expansion_factor: DEFAULT_EXPANSION_FACTOR,
            default_index: IndexKind::default(),
            rerank_factor: DEFAULT_RERANK_FACTOR,
        }
    }
}

impl StoreConfig {
    /// Resolve the configuration from, in order of priority:
    /// 1. The `VECSTORE_*` environment variables, if set
    /// 2. Otherwise, the built-in defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(EXPANSION_FACTOR_ENV_VAR) {
            config.expansion_factor =
                parse_var(EXPANSION_FACTOR_ENV_VAR, &value)?;
        }
        if let Some(value) = lookup(INDEX_ENV_VAR) {
            config.default_index = parse_var(INDEX_ENV_VAR, &value)?;
        }
        if let Some(value) = lookup(RERANK_FACTOR_ENV_VAR) {
            config.rerank_factor = parse_var(RERANK_FACTOR_ENV_VAR, &value)?;
        }
        Ok(config.normalized())
    }

    pub fn with_expansion_factor(mut self, factor: usize) -> Self {
        self.expansion_factor = factor;
        self.normalized()
    }

    pub fn with_default_index(mut self, kind: IndexKind) -> Self {
        self.default_index = kind;
        self
    }

    pub fn with_rerank_factor(mut self, factor: usize) -> Self {
        self.rerank_factor = factor;
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.expansion_factor = self.expansion_factor.max(1);
        self.rerank_factor = self.rerank_factor.max(1);
        self
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        Error::Config(format!("invalid {name}={value:?}: {e}"))
    })
}
