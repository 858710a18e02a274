// 🏛️ Field Sets - Recognized data columns and third-party lists per locale
//
// A locale carries two name sets: `fields` (the data-column whitelist used by
// feed reconciliation) and `thirdParties`. Both are sets: membership matters,
// order does not.

use crate::error::{CatalogResult, ErrorCollector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prefix that marks a token in an update delta as a removal request.
pub const REMOVAL_PREFIX: char = '-';

/// Names that can never be removed from a locale's `fields` set.
///
/// A `-url` token in an update delta is silently ignored.
pub const NON_REMOVABLE_FIELDS: &[&str] = &["url"];

// ============================================================================
// FIELD SET
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet(BTreeSet<String>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial set from a comma-separated list.
    ///
    /// Removal tokens and empty tokens are dropped; there is nothing to
    /// remove from yet.
    pub fn from_list(raw: &str) -> Self {
        FieldSet(
            tokens(raw)
                .filter(|t| !t.starts_with(REMOVAL_PREFIX))
                .map(str::to_string)
                .collect(),
        )
    }

    /// Apply a comma-separated delta.
    ///
    /// Plain tokens are added, `-name` tokens remove `name`. Names listed in
    /// `protected` survive removal requests. The result never contains
    /// prefixed or empty names.
    pub fn update(&self, delta: &str, protected: &[&str]) -> FieldSet {
        let delta: Vec<&str> = tokens(delta).collect();

        let mut candidate: BTreeSet<String> = self.0.clone();
        candidate.extend(
            delta
                .iter()
                .filter(|t| !t.starts_with(REMOVAL_PREFIX))
                .map(|t| t.to_string()),
        );

        for token in &delta {
            if let Some(bare) = token.strip_prefix(REMOVAL_PREFIX) {
                if !protected.contains(&bare) {
                    candidate.remove(bare);
                }
            }
        }

        candidate.retain(|name| !name.is_empty() && !name.starts_with(REMOVAL_PREFIX));
        FieldSet(candidate)
    }

    /// Apply an optional delta; `None` keeps the set as is.
    pub fn update_opt(&self, delta: Option<&str>, protected: &[&str]) -> FieldSet {
        match delta {
            Some(d) => self.update(d, protected),
            None => self.clone(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every stored name is usable as a data column.
    ///
    /// Sets built through [`FieldSet::from_list`] and [`FieldSet::update`] always
    /// pass; sets loaded from an older document may not.
    pub fn validate(&self, attribute: &str) -> CatalogResult<()> {
        let mut errors = ErrorCollector::new();
        for name in &self.0 {
            if name.trim().is_empty() {
                errors.add(attribute, name.clone(), "Field names must not be blank.");
            } else if name.starts_with(REMOVAL_PREFIX) {
                errors.add(attribute, name.clone(), "Field names must not start with '-'.");
            } else if name.contains([';', ':']) {
                errors.add(attribute, name.clone(), "Field names must not contain ';' or ':'.");
            }
        }
        errors.finish(format!("Locale {attribute} list is invalid."))
    }
}

impl<S: Into<String>> FromIterator<S> for FieldSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        FieldSet(iter.into_iter().map(Into::into).collect())
    }
}

fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> FieldSet {
        names.iter().copied().collect()
    }

    #[test]
    fn test_union_and_removal() {
        let current = set(&["a", "b"]);
        assert_eq!(current.update("c,-a", &[]), set(&["b", "c"]));
    }

    #[test]
    fn test_removal_of_missing_name_is_dropped() {
        let current = set(&["a"]);
        assert_eq!(current.update("-zzz", &[]), set(&["a"]));
    }

    #[test]
    fn test_tokens_are_trimmed_and_blanks_ignored() {
        let current = set(&["Title"]);
        assert_eq!(current.update(" mpId , , -Title ", &[]), set(&["mpId"]));
    }

    #[test]
    fn test_add_then_remove_in_same_delta() {
        let current = FieldSet::new();
        assert!(current.update("x,-x", &[]).is_empty());
    }

    #[test]
    fn test_protected_url_field_survives_removal() {
        let current = set(&["url", "Title"]);
        let updated = current.update("-url,-Title", NON_REMOVABLE_FIELDS);
        assert_eq!(updated, set(&["url"]));
    }

    #[test]
    fn test_from_list_drops_removal_tokens() {
        assert_eq!(FieldSet::from_list("Title, -mpId,,scSku"), set(&["Title", "scSku"]));
    }

    #[test]
    fn test_validate_flags_bad_names() {
        assert!(set(&["Title"]).validate("fields").is_ok());
        assert!(set(&["-Title", "a:b"]).validate("fields").is_err());
    }

    #[test]
    fn test_update_opt_none_keeps_set() {
        let current = set(&["a"]);
        assert_eq!(current.update_opt(None, &[]), current);
    }
}
