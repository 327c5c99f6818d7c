//! Typed registry of invalidation rules.
//!
//! Maps each content kind to a decoder that turns a [`ContentEvent`] payload
//! into the entity type and asks it for its invalidation targets. Kinds that
//! are never registered are cache-inert.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::types::EntityKind;

use super::events::ContentEvent;
use super::targets::{CacheInvalidating, InvalidationTarget};

type TargetFn =
    Box<dyn Fn(&ContentEvent) -> Result<InvalidationTarget, RegistryError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to decode `{kind}` {field} snapshot: {source}")]
    Decode {
        kind: EntityKind,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Default)]
pub struct InvalidationRegistry {
    rules: HashMap<EntityKind, TargetFn>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under `E::KIND`, replacing any earlier rule for the kind.
    pub fn register<E>(&mut self)
    where
        E: CacheInvalidating + DeserializeOwned + 'static,
    {
        self.rules.insert(E::KIND, Box::new(targets_for_entity::<E>));
    }

    pub fn with<E>(mut self) -> Self
    where
        E: CacheInvalidating + DeserializeOwned + 'static,
    {
        self.register::<E>();
        self
    }

    pub fn is_registered(&self, kind: EntityKind) -> bool {
        self.rules.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| self.is_registered(*kind))
            .collect()
    }

    /// Targets for `event`, or `None` when its kind is inert.
    pub fn targets_for(
        &self,
        event: &ContentEvent,
    ) -> Result<Option<InvalidationTarget>, RegistryError> {
        match self.rules.get(&event.kind) {
            Some(rule) => rule(event).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for InvalidationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn targets_for_entity<E>(event: &ContentEvent) -> Result<InvalidationTarget, RegistryError>
where
    E: CacheInvalidating + DeserializeOwned,
{
    let decode = |value: &serde_json::Value, field: &'static str| {
        E::deserialize(value).map_err(|source| RegistryError::Decode {
            kind: E::KIND,
            field,
            source,
        })
    };

    let current = decode(&event.current, "current")?;
    let previous = event
        .previous_snapshot()
        .map(|value| decode(value, "previous"))
        .transpose()?;

    Ok(current.invalidation_targets(previous.as_ref()))
}
