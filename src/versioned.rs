// ⏰ Versioned Attributes - A value plus its append-only change log
//
// Every mutable field on a locale or a catalog entry is stored this way:
//   { value, createdAt, history: [{ previousValue, updatedValue, updatedAt, updatedBy }] }
//
// History is never rewritten. The last entry's updatedValue is always the
// current value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ACTOR
// ============================================================================

/// Who performed a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    /// Caller authenticated with the master key.
    Admin,
    /// Caller authenticated with a regular API key.
    Key(String),
}

impl Actor {
    pub fn key(key: impl Into<String>) -> Self {
        Actor::Key(key.into())
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Admin => f.write_str("admin"),
            Actor::Key(key) => f.write_str(key),
        }
    }
}

// ============================================================================
// HISTORY ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry<T = String> {
    pub previous_value: T,
    pub updated_value: T,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

// ============================================================================
// VERSIONED ATTRIBUTE
// ============================================================================

/// A value with an append-only audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedAttribute<T = String> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub history: Vec<HistoryEntry<T>>,
}

impl<T> Default for VersionedAttribute<T> {
    fn default() -> Self {
        VersionedAttribute {
            value: None,
            created_at: None,
            history: Vec::new(),
        }
    }
}

impl<T> VersionedAttribute<T>
where
    T: Clone + PartialEq + Default,
{
    /// Attribute that has never held a value.
    pub fn unset() -> Self {
        Self::default()
    }

    /// Fresh attribute holding `value`, with an empty history.
    pub fn initial(value: T) -> Self {
        Self::initial_at(value, Utc::now())
    }

    pub fn initial_at(value: T, now: DateTime<Utc>) -> Self {
        VersionedAttribute {
            value: Some(value),
            created_at: Some(now),
            history: Vec::new(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Apply an incoming value on behalf of `actor`.
    ///
    /// Returns `true` when a history entry was appended. Absent or unchanged
    /// input leaves the attribute untouched.
    pub fn apply(&mut self, incoming: Option<T>, actor: &Actor) -> bool {
        self.apply_at(incoming, actor, Utc::now())
    }

    pub fn apply_at(&mut self, incoming: Option<T>, actor: &Actor, now: DateTime<Utc>) -> bool {
        let Some(incoming) = incoming else {
            return false;
        };
        if self.value.as_ref() == Some(&incoming) {
            return false;
        }

        self.history.push(HistoryEntry {
            previous_value: self.value.clone().unwrap_or_default(),
            updated_value: incoming.clone(),
            updated_at: now,
            updated_by: actor.to_string(),
        });
        self.value = Some(incoming);
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        true
    }

    /// Timestamp of the most recent change, falling back to creation time.
    pub fn last_changed(&self) -> Option<DateTime<Utc>> {
        self.history
            .last()
            .map(|h| h.updated_at)
            .or(self.created_at)
    }
}

impl VersionedAttribute<String> {
    /// Current value, treating an empty string as unset.
    pub fn non_empty(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn as_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// Apply `incoming` to an optional attribute, creating it on first write.
///
/// Used for credentials and other attributes whose absence is meaningful.
pub fn apply_optional(
    slot: &mut Option<VersionedAttribute>,
    incoming: Option<String>,
    actor: &Actor,
    now: DateTime<Utc>,
) -> bool {
    let Some(incoming) = incoming.filter(|v| !v.is_empty()) else {
        return false;
    };
    slot.get_or_insert_with(VersionedAttribute::unset)
        .apply_at(Some(incoming), actor, now)
}
