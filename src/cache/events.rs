//! Content write notifications published by the CMS after commit.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::types::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// One committed write of a content entity.
///
/// `current` is the instance after the write (the removed instance for a
/// delete). `previous` is the instance before an update, when the publisher
/// has it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: EntityKind,
    pub change: ChangeKind,
    pub current: Value,
    #[serde(default)]
    pub previous: Option<Value>,
}

impl ContentEvent {
    pub fn new(kind: EntityKind, change: ChangeKind, current: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            change,
            current,
            previous: None,
        }
    }

    pub fn with_previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Snapshot of the instance before the write, if it is meaningful for
    /// this change. Creates and deletes have none.
    pub fn previous_snapshot(&self) -> Option<&Value> {
        match self.change {
            ChangeKind::Updated => self.previous.as_ref().filter(|value| !value.is_null()),
            ChangeKind::Created | ChangeKind::Deleted => None,
        }
    }
}
