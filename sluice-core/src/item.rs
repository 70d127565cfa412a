//! Item identity and ordering.
//!
//! An item is the unit of backlog tracking: one remote file, one message. The
//! backlog only needs equality and hashing for set membership; a total order
//! is required only when a comparator-driven [`ReceptionOrder`] is chosen.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Bounds every tracked item must satisfy.
pub trait BacklogItem: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> BacklogItem for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Items that carry a name filters can match against.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

/// A file observed in a remote (or local) directory listing.
///
/// Equality covers name, size and modification time, so a file rewritten in
/// place is a new item even though its name did not change.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub modified_ms: i64,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, size: u64, modified_ms: i64) -> Self {
        Self {
            name: name.into(),
            size,
            modified_ms,
        }
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.modified_ms).single()
    }

    /// Stable textual identity, suitable for log fields and dedupe keys.
    pub fn identity_key(&self) -> String {
        format!("{}:{}:{}", self.name, self.size, self.modified_ms)
    }
}

impl Named for RemoteFile {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Oldest modification first, then by name.
impl Ord for RemoteFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.modified_ms
            .cmp(&other.modified_ms)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.size.cmp(&other.size))
    }
}

impl PartialOrd for RemoteFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.name, self.size)
    }
}

type CompareFn<T> = dyn Fn(&T, &T) -> Ordering + Send + Sync;

/// Order in which pending items are handed out by `reserve`.
pub enum ReceptionOrder<T> {
    /// First observed, first reserved.
    Insertion,
    /// Lowest item according to the comparator is reserved first.
    Comparator(Arc<CompareFn<T>>),
}

impl<T> ReceptionOrder<T> {
    pub fn natural() -> Self
    where
        T: Ord,
    {
        ReceptionOrder::Comparator(Arc::new(|a: &T, b: &T| a.cmp(b)))
    }

    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        ReceptionOrder::Comparator(Arc::new(compare))
    }

    pub fn from_kind(kind: OrderKind) -> Self
    where
        T: Ord,
    {
        match kind {
            OrderKind::Insertion => ReceptionOrder::Insertion,
            OrderKind::Natural => ReceptionOrder::natural(),
        }
    }

    pub(crate) fn comparator(&self) -> Option<&CompareFn<T>> {
        match self {
            ReceptionOrder::Insertion => None,
            ReceptionOrder::Comparator(compare) => Some(compare.as_ref()),
        }
    }
}

impl<T> Default for ReceptionOrder<T> {
    fn default() -> Self {
        ReceptionOrder::Insertion
    }
}

impl<T> Clone for ReceptionOrder<T> {
    fn clone(&self) -> Self {
        match self {
            ReceptionOrder::Insertion => ReceptionOrder::Insertion,
            ReceptionOrder::Comparator(compare) => ReceptionOrder::Comparator(Arc::clone(compare)),
        }
    }
}

impl<T> fmt::Debug for ReceptionOrder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceptionOrder::Insertion => f.write_str("Insertion"),
            ReceptionOrder::Comparator(_) => f.write_str("Comparator(..)"),
        }
    }
}

/// Serializable selector for [`ReceptionOrder`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Insertion,
    Natural,
}
