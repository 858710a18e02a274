// ⚖️ Feed Reconciliation - Merge feed rows into a locale's catalog entries
//
// For every row, in order:
//   1. find the stored entry (SKU first, then url)
//   2. reuse its id, or mint a new one for variants and unmatched rows
//   3. merge whitelisted fields through VersionedAttribute::apply
//   4. emit an upsert intent
//
// No row of a batch ever reuses an id already taken by an earlier row.
// Re-running an unchanged feed appends nothing to any history.

use crate::attributes::FieldSet;
use crate::entities::CatalogEntry;
use crate::error::CatalogResult;
use crate::matching::{EntryMatcher, MatchStrategy};
use crate::parser::{is_identity_column, FeedRow, SKU_COLUMN, TYPE_COLUMN, URL_COLUMN};
use crate::versioned::{Actor, VersionedAttribute};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ============================================================================
// UPSERT INTENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Write onto an existing entry's id.
    Update,
    /// Create an entry under a freshly minted id.
    Create,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertIntent {
    pub kind: IntentKind,
    pub id: String,
    /// Index of the originating feed row.
    pub row: usize,
    /// Stored entry the row matched, even if its id was not reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchStrategy>,
    pub url: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(rename = "SKU", skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub in_xml_sitemap: bool,
    pub data: BTreeMap<String, VersionedAttribute>,
}

impl UpsertIntent {
    pub fn is_update(&self) -> bool {
        self.kind == IntentKind::Update
    }

    /// History entries this intent adds on top of what is stored.
    pub fn history_len(&self) -> usize {
        self.data.values().map(|a| a.history.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationOutcome {
    pub intents: Vec<UpsertIntent>,
    /// Feed columns that are neither identity columns nor whitelisted.
    pub ignored_columns: Vec<String>,
}

impl ReconciliationOutcome {
    pub fn updates(&self) -> usize {
        self.intents.iter().filter(|i| i.is_update()).count()
    }

    pub fn creates(&self) -> usize {
        self.intents.len() - self.updates()
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct FeedReconciler<'a> {
    fields: &'a FieldSet,
    existing: &'a [CatalogEntry],
    actor: &'a Actor,
    now: DateTime<Utc>,
}

impl<'a> FeedReconciler<'a> {
    pub fn new(fields: &'a FieldSet, existing: &'a [CatalogEntry], actor: &'a Actor) -> Self {
        FeedReconciler {
            fields,
            existing,
            actor,
            now: Utc::now(),
        }
    }

    /// Pin the timestamp written into history entries.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn reconcile(&self, rows: &[FeedRow]) -> CatalogResult<ReconciliationOutcome> {
        self.fields.validate("fields")?;

        let mut matcher = EntryMatcher::new(self.existing);
        let mut intents = Vec::with_capacity(rows.len());
        let mut ignored = BTreeSet::new();

        for (index, row) in rows.iter().enumerate() {
            for column in row.keys() {
                if !is_identity_column(column) && !self.fields.contains(column) {
                    ignored.insert(column.clone());
                }
            }

            let sku = row.get(SKU_COLUMN).map(|s| strip_apostrophes(s)).filter(|s| !s.is_empty());
            let row_url = row.get(URL_COLUMN).map(String::as_str).unwrap_or("");

            let found = matcher.find(sku.as_deref(), Some(row_url));
            let reused = found
                .filter(|m| m.is_reusable(sku.as_deref()))
                .map(|m| m.entry);
            if let Some(entry) = reused {
                matcher.claim(entry);
            }

            let (kind, id, url, prior) = match reused {
                Some(entry) => (IntentKind::Update, entry.id.clone(), entry.url.clone(), Some(&entry.data)),
                None => (
                    IntentKind::Create,
                    uuid::Uuid::new_v4().to_string(),
                    row_url.to_string(),
                    None,
                ),
            };

            let in_xml_sitemap = found
                .map(|m| m.entry)
                .filter(|entry| entry.url == url)
                .is_some_and(|entry| entry.in_xml_sitemap);

            debug!(
                row = index,
                strategy = ?found.map(|m| m.strategy),
                reused = reused.is_some(),
                "reconciled feed row"
            );

            intents.push(UpsertIntent {
                kind,
                id,
                row: index,
                matched: found.map(|m| m.strategy),
                url,
                entry_type: row.get(TYPE_COLUMN).cloned().unwrap_or_default(),
                sku,
                in_xml_sitemap,
                data: self.merge_fields(prior, row),
            });
        }

        Ok(ReconciliationOutcome {
            intents,
            ignored_columns: ignored.into_iter().collect(),
        })
    }

    /// Merge whitelisted row values onto the prior data map.
    ///
    /// Fields the row leaves blank keep their prior attribute untouched;
    /// fields never seen before start with an empty history.
    fn merge_fields(
        &self,
        prior: Option<&BTreeMap<String, VersionedAttribute>>,
        row: &FeedRow,
    ) -> BTreeMap<String, VersionedAttribute> {
        let mut data = prior.cloned().unwrap_or_default();

        for field in self.fields.iter() {
            let Some(incoming) = row
                .get(field)
                .map(|raw| strip_apostrophes(raw))
                .filter(|v| !v.is_empty())
            else {
                continue;
            };

            match data.get_mut(field) {
                Some(attr) => {
                    attr.apply_at(Some(incoming), self.actor, self.now);
                }
                None => {
                    data.insert(field.to_string(), VersionedAttribute::initial_at(incoming, self.now));
                }
            }
        }

        data
    }
}

/// Remove spreadsheet quoting artifacts.
fn strip_apostrophes(raw: &str) -> String {
    raw.replace('\'', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntrySource;
    use chrono::Duration;

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn row(pairs: &[(&str, &str)]) -> FeedRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn fields(names: &[&str]) -> FieldSet {
        names.iter().copied().collect()
    }

    /// Persist intents the way the store does, for multi-pass tests.
    fn materialize(intents: &[UpsertIntent]) -> Vec<CatalogEntry> {
        intents
            .iter()
            .map(|i| {
                let mut e = CatalogEntry::new("l", "https://ex.com", i.url.clone(), EntrySource::Feed)
                    .with_type(i.entry_type.clone())
                    .with_data(i.data.clone());
                e.id = i.id.clone();
                e.sku = i.sku.clone();
                e.in_xml_sitemap = i.in_xml_sitemap;
                e
            })
            .collect()
    }

    #[test]
    fn test_new_row_creates_fresh_attributes() {
        let f = fields(&["Title"]);
        let actor = Actor::key("k1");
        let outcome = FeedReconciler::new(&f, &[], &actor)
            .reconcile(&[row(&[("url", "https://ex.com/p1"), ("SKU", "100"), ("Title", "Soap")])])
            .unwrap();

        assert_eq!(outcome.intents.len(), 1);
        let intent = &outcome.intents[0];
        assert_eq!(intent.kind, IntentKind::Create);
        assert_eq!(intent.data["Title"].as_str(), "Soap");
        assert!(intent.data["Title"].history.is_empty());
        assert!(!intent.in_xml_sitemap);
    }

    #[test]
    fn test_sku_match_updates_existing_entry() {
        let mut existing = CatalogEntry::new("l", "https://ex.com", "X", EntrySource::Feed).with_sku("A1");
        existing.data.insert("Title".into(), VersionedAttribute::initial_at("Old".into(), t(0)));
        let entries = vec![existing.clone()];

        let f = fields(&["Title"]);
        let actor = Actor::Admin;
        let outcome = FeedReconciler::new(&f, &entries, &actor)
            .at(t(1))
            .reconcile(&[row(&[("url", "Y"), ("SKU", "A1"), ("Title", "T")])])
            .unwrap();

        let intent = &outcome.intents[0];
        assert_eq!(intent.kind, IntentKind::Update);
        assert_eq!(intent.id, existing.id);
        assert_eq!(intent.url, "X");
        assert_eq!(intent.matched, Some(MatchStrategy::Sku));
        assert_eq!(intent.data["Title"].history.len(), 1);
        assert_eq!(intent.data["Title"].history[0].previous_value, "Old");
        assert_eq!(intent.data["Title"].history[0].updated_by, "admin");
    }

    #[test]
    fn test_variants_sharing_a_sitemap_url_get_distinct_ids() {
        let stub = CatalogEntry::discovered("l", "https://ex.com", "U");
        let entries = vec![stub.clone()];
        let f = fields(&[]);
        let actor = Actor::Admin;

        let outcome = FeedReconciler::new(&f, &entries, &actor)
            .reconcile(&[row(&[("url", "U"), ("SKU", "A1")]), row(&[("url", "U"), ("SKU", "A2")])])
            .unwrap();

        let ids: Vec<&str> = outcome.intents.iter().map(|i| i.id.as_str()).collect();
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids.iter().filter(|id| **id == stub.id).count(), 1);
        assert_eq!(outcome.updates(), 1);
        assert_eq!(outcome.creates(), 1);
        assert!(outcome.intents.iter().all(|i| i.in_xml_sitemap));
    }

    #[test]
    fn test_reimporting_unchanged_feed_adds_no_history() {
        let f = fields(&["Title", "mpId"]);
        let actor = Actor::key("k1");
        let rows = vec![
            row(&[("url", "https://ex.com/p1"), ("SKU", "100"), ("Title", "Soap"), ("mpId", "1")]),
            row(&[("url", "https://ex.com/p1"), ("SKU", "101"), ("Title", "Soap XL")]),
            row(&[("url", "https://ex.com/blog"), ("type", "article"), ("Title", "News")]),
        ];

        let first = FeedReconciler::new(&f, &[], &actor).reconcile(&rows).unwrap();
        let stored = materialize(&first.intents);
        let second = FeedReconciler::new(&f, &stored, &actor).reconcile(&rows).unwrap();

        assert_eq!(second.updates(), 3);
        assert_eq!(second.intents.iter().map(UpsertIntent::history_len).sum::<usize>(), 0);
        for (a, b) in first.intents.iter().zip(&second.intents) {
            assert_eq!(a.id, b.id);
        }
    }

    #[test]
    fn test_history_grows_and_stays_continuous_across_passes() {
        let f = fields(&["Title"]);
        let actor = Actor::Admin;
        let mut stored = Vec::new();

        for (pass, title) in ["A", "B", "C"].iter().enumerate() {
            let outcome = FeedReconciler::new(&f, &stored, &actor)
                .at(t(pass as i64))
                .reconcile(&[row(&[("url", "u"), ("SKU", "1"), ("Title", title)])])
                .unwrap();
            stored = materialize(&outcome.intents);
        }

        let title = &stored[0].data["Title"];
        assert_eq!(title.history.len(), 2);
        assert_eq!(title.history[0].previous_value, "A");
        assert_eq!(title.history[1].previous_value, title.history[0].updated_value);
        assert_eq!(title.as_str(), "C");
    }

    #[test]
    fn test_blank_field_keeps_prior_attribute() {
        let mut existing = CatalogEntry::new("l", "https://ex.com", "u", EntrySource::Feed).with_sku("1");
        existing.data.insert("Title".into(), VersionedAttribute::initial_at("Keep".into(), t(0)));
        let entries = vec![existing];
        let f = fields(&["Title", "mpId"]);
        let actor = Actor::Admin;

        let outcome = FeedReconciler::new(&f, &entries, &actor)
            .reconcile(&[row(&[("url", "u"), ("SKU", "1"), ("mpId", "9")])])
            .unwrap();

        let data = &outcome.intents[0].data;
        assert_eq!(data["Title"].as_str(), "Keep");
        assert!(data["Title"].history.is_empty());
        assert_eq!(data["mpId"].as_str(), "9");
    }

    #[test]
    fn test_apostrophes_are_stripped_and_unknown_columns_reported() {
        let f = fields(&["Title"]);
        let actor = Actor::Admin;
        let outcome = FeedReconciler::new(&f, &[], &actor)
            .reconcile(&[row(&[("url", "u"), ("SKU", "'0037'"), ("Title", "'Soap'"), ("Color", "red")])])
            .unwrap();

        let intent = &outcome.intents[0];
        assert_eq!(intent.sku.as_deref(), Some("0037"));
        assert_eq!(intent.data["Title"].as_str(), "Soap");
        assert!(!intent.data.contains_key("Color"));
        assert_eq!(outcome.ignored_columns, vec!["Color"]);
    }

    #[test]
    fn test_row_without_sku_or_url_mints_new_identity() {
        let entries = vec![CatalogEntry::discovered("l", "https://ex.com", "")];
        let f = fields(&["Title"]);
        let actor = Actor::Admin;
        let outcome = FeedReconciler::new(&f, &entries, &actor)
            .reconcile(&[row(&[("Title", "orphan")])])
            .unwrap();

        assert_eq!(outcome.intents[0].kind, IntentKind::Create);
        assert!(outcome.intents[0].matched.is_none());
    }

    #[test]
    fn test_invalid_whitelist_is_rejected_up_front() {
        let f = fields(&["-bad"]);
        let actor = Actor::Admin;
        assert!(FeedReconciler::new(&f, &[], &actor).reconcile(&[]).is_err());
    }
}
