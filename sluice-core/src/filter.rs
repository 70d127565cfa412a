//! Listing filters applied before reconciliation.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Result, SluiceError};
use crate::item::Named;

/// Narrows a raw listing down to the items worth tracking.
pub trait SnapshotFilter<T>: Send + Sync {
    fn accept(&self, item: &T) -> bool;

    fn filter(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().filter(|item| self.accept(item)).collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl<T> SnapshotFilter<T> for AcceptAll {
    fn accept(&self, _item: &T) -> bool {
        true
    }

    fn filter(&self, items: Vec<T>) -> Vec<T> {
        items
    }
}

/// Accepts items whose name matches a regular expression.
#[derive(Clone, Debug)]
pub struct PatternFilter {
    pattern: Regex,
}

impl PatternFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|err| SluiceError::InvalidConfig(format!("invalid pattern {pattern:?}: {err}")))?;
        Ok(Self { pattern })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl<T: Named> SnapshotFilter<T> for PatternFilter {
    fn accept(&self, item: &T) -> bool {
        self.pattern.is_match(item.name())
    }
}

/// Rejects dot-files and names of transfers still in progress. By default a
/// name ending in `.INCOMPLETE`, `.part` or `.tmp` is still being written.
#[derive(Clone, Debug)]
pub struct IgnoreHidden {
    incomplete_suffixes: Vec<String>,
}

impl Default for IgnoreHidden {
    fn default() -> Self {
        Self {
            incomplete_suffixes: vec![".INCOMPLETE".into(), ".part".into(), ".tmp".into()],
        }
    }
}

impl IgnoreHidden {
    pub fn with_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            incomplete_suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl<T: Named> SnapshotFilter<T> for IgnoreHidden {
    fn accept(&self, item: &T) -> bool {
        let name = item.name();
        let base = name.rsplit('/').next().unwrap_or(name);
        !base.starts_with('.')
            && !self
                .incomplete_suffixes
                .iter()
                .any(|suffix| base.ends_with(suffix.as_str()))
    }
}

/// Accepts an item only if every inner filter does.
pub struct CompositeFilter<T> {
    filters: Vec<Arc<dyn SnapshotFilter<T>>>,
}

impl<T> Default for CompositeFilter<T> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for CompositeFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl<T> CompositeFilter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl SnapshotFilter<T> + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl<T> SnapshotFilter<T> for CompositeFilter<T> {
    fn accept(&self, item: &T) -> bool {
        self.filters.iter().all(|filter| filter.accept(item))
    }
}
