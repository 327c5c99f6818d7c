//! Invalidation targets declared by content entities.

use std::fmt;

use serde::Serialize;

use crate::domain::types::EntityKind;

/// A cached path affected by a content change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "match", content = "path", rename_all = "snake_case")]
pub enum CachePath {
    /// Every entry whose URL starts with this string.
    Prefix(String),
    /// Only the entry stored under exactly this URL.
    Exact(String),
}

impl CachePath {
    pub fn prefix(path: impl Into<String>) -> Self {
        Self::Prefix(path.into())
    }

    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            CachePath::Prefix(path) | CachePath::Exact(path) => path,
        }
    }
}

impl From<&str> for CachePath {
    fn from(path: &str) -> Self {
        Self::Prefix(path.to_string())
    }
}

impl From<String> for CachePath {
    fn from(path: String) -> Self {
        Self::Prefix(path)
    }
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePath::Prefix(path) => write!(f, "{path}*"),
            CachePath::Exact(path) => f.write_str(path),
        }
    }
}

/// Result of asking an entity which cached pages its change affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationTarget {
    /// Drop the whole store.
    All,
    /// Drop entries matching any of these paths.
    Paths(Vec<CachePath>),
}

impl InvalidationTarget {
    pub fn none() -> Self {
        Self::Paths(Vec::new())
    }

    /// Build a path list, dropping duplicates while keeping first-seen order.
    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<CachePath>,
    {
        let mut collected: Vec<CachePath> = Vec::new();
        for path in paths {
            let path = path.into();
            if !collected.contains(&path) {
                collected.push(path);
            }
        }
        Self::Paths(collected)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, InvalidationTarget::All)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, InvalidationTarget::Paths(paths) if paths.is_empty())
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationTarget::All => f.write_str("all"),
            InvalidationTarget::Paths(paths) => {
                let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Content types whose writes can make cached pages stale.
///
/// Implementing this trait is the opt-in: a type that does not implement it
/// never invalidates anything.
pub trait CacheInvalidating {
    const KIND: EntityKind;

    /// Pages affected by the transition from `previous` (`None` on create or
    /// delete) to `self`.
    fn invalidation_targets(&self, previous: Option<&Self>) -> InvalidationTarget;
}
