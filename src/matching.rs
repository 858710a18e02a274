// 🔍 Entry Matching - Find the stored entry a feed row refers to
//
// Two strategies, tried in order: SKU (the variant-identity key), then exact
// url. The matcher tracks which entry ids a batch has already claimed so
// one stored entry never backs two rows.

use crate::entities::CatalogEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Stored entry has the same non-empty SKU.
    Sku,
    /// Stored entry has exactly the same url.
    Url,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryMatch<'a> {
    pub entry: &'a CatalogEntry,
    pub strategy: MatchStrategy,
    /// Another row of this batch already took the entry's id.
    pub already_claimed: bool,
}

impl EntryMatch<'_> {
    /// Whether the matched entry's identity may be reused for the row.
    ///
    /// SKU matches always carry identity. A url match is reused only for a
    /// sitemap stub or a row without SKU, and never when the two SKUs
    /// disagree.
    pub fn is_reusable(&self, row_sku: Option<&str>) -> bool {
        if self.already_claimed {
            return false;
        }
        match self.strategy {
            MatchStrategy::Sku => true,
            MatchStrategy::Url => {
                let sku_compatible = row_sku.is_none() || self.entry.sku_value().is_none();
                sku_compatible && (self.entry.in_xml_sitemap || row_sku.is_none())
            }
        }
    }
}

/// Matches feed rows against a locale's stored entries for one batch.
pub struct EntryMatcher<'a> {
    entries: &'a [CatalogEntry],
    claimed: HashSet<&'a str>,
}

impl<'a> EntryMatcher<'a> {
    pub fn new(entries: &'a [CatalogEntry]) -> Self {
        EntryMatcher {
            entries,
            claimed: HashSet::new(),
        }
    }

    /// Find the entry for a row's SKU and url. Rows with neither never match.
    pub fn find(&self, sku: Option<&str>, url: Option<&str>) -> Option<EntryMatch<'a>> {
        if let Some(sku) = sku.filter(|s| !s.is_empty()) {
            if let Some(entry) = self.entries.iter().find(|e| e.sku_value() == Some(sku)) {
                return Some(self.wrap(entry, MatchStrategy::Sku));
            }
        }

        let url = url.filter(|u| !u.is_empty())?;
        let mut at_url = self.entries.iter().filter(|e| e.url == url);
        let first = at_url.next()?;
        let entry = std::iter::once(first)
            .chain(at_url)
            .find(|e| !self.claimed.contains(e.id.as_str()))
            .unwrap_or(first);
        Some(self.wrap(entry, MatchStrategy::Url))
    }

    /// Mark an entry id as taken by the current batch.
    pub fn claim(&mut self, entry: &'a CatalogEntry) {
        self.claimed.insert(entry.id.as_str());
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    fn wrap(&self, entry: &'a CatalogEntry, strategy: MatchStrategy) -> EntryMatch<'a> {
        EntryMatch {
            entry,
            strategy,
            already_claimed: self.claimed.contains(entry.id.as_str()),
        }
    }
}
