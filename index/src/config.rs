//! Index configuration.
//!
//! Options can be built in code or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PAGE_INDEX_CACHE_PAGES`: Pages held in the page cache (default: `20`)
//! - `PAGE_INDEX_SPLIT_FACTOR`: Share of a full page kept on the left when an
//!   inner page splits (default: `0.5`)
//! - `PAGE_INDEX_TAIL_SPLIT_FACTOR`: The same for the last page, which
//!   favors append-heavy workloads (default: `0.875`)
//!
//! # Invariants
//!
//! Ranges are checked when an index is opened, not here:
//! - `cache_capacity >= 2`
//! - both split factors lie in `(0.1, 1.0)`

/// Options for opening an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Number of pages kept in memory.
    pub cache_capacity: usize,
    /// Split factor for pages that are not the last page.
    pub split_factor: f64,
    /// Split factor for the last page.
    pub tail_split_factor: f64,
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

impl IndexOptions {
    /// Default page cache capacity.
    pub const DEFAULT_CACHE_CAPACITY: usize = 20;
    /// Default split factor for inner pages.
    pub const DEFAULT_SPLIT_FACTOR: f64 = 0.5;
    /// Default split factor for the last page.
    pub const DEFAULT_TAIL_SPLIT_FACTOR: f64 = 0.875;

    const CACHE_PAGES_VAR: &'static str = "PAGE_INDEX_CACHE_PAGES";
    const SPLIT_FACTOR_VAR: &'static str = "PAGE_INDEX_SPLIT_FACTOR";
    const TAIL_SPLIT_FACTOR_VAR: &'static str = "PAGE_INDEX_TAIL_SPLIT_FACTOR";

    /// Load options from environment variables, using defaults for any that
    /// are unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load options through `lookup`, which maps a variable name to its value.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            cache_capacity: parse_var(&lookup, Self::CACHE_PAGES_VAR)?
                .unwrap_or(defaults.cache_capacity),
            split_factor: parse_var(&lookup, Self::SPLIT_FACTOR_VAR)?
                .unwrap_or(defaults.split_factor),
            tail_split_factor: parse_var(&lookup, Self::TAIL_SPLIT_FACTOR_VAR)?
                .unwrap_or(defaults.tail_split_factor),
        })
    }

    /// Set the page cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, pages: usize) -> Self {
        self.cache_capacity = pages;
        self
    }

    /// Set both split factors.
    #[must_use]
    pub const fn with_split_factors(mut self, inner: f64, tail: f64) -> Self {
        self.split_factor = inner;
        self.tail_split_factor = tail;
        self
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
            split_factor: Self::DEFAULT_SPLIT_FACTOR,
            tail_split_factor: Self::DEFAULT_TAIL_SPLIT_FACTOR,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' could not be parsed"),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn test_default_values() {
        let options = IndexOptions::default();
        assert_eq!(options.cache_capacity, 20);
        assert!((options.split_factor - 0.5).abs() < f64::EPSILON);
        assert!((options.tail_split_factor - 0.875).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unset_vars_use_defaults() {
        let options = IndexOptions::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(options, IndexOptions::default());
    }

    #[test]
    fn test_vars_override_defaults() {
        let options = IndexOptions::from_lookup(lookup(&[
            ("PAGE_INDEX_CACHE_PAGES", "64"),
            ("PAGE_INDEX_SPLIT_FACTOR", " 0.6 "),
        ]))
        .expect("parse");
        assert_eq!(options.cache_capacity, 64);
        assert!((options.split_factor - 0.6).abs() < f64::EPSILON);
        assert!((options.tail_split_factor - 0.875).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let error = IndexOptions::from_lookup(lookup(&[("PAGE_INDEX_CACHE_PAGES", "many")]))
            .expect_err("should fail");
        assert_eq!(
            error.to_string(),
            "invalid value for PAGE_INDEX_CACHE_PAGES: 'many' could not be parsed"
        );
    }
}
