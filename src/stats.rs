// 📊 Locale Stats - Derived, read-only summary of a locale's entries
//
// Recomputed after every mutation, detached from the request that caused it.
// The snapshot is best effort: concurrent refreshes for one locale are not
// serialized and the last write wins.

use crate::db::CatalogStore;
use crate::entities::CatalogEntry;
use crate::error::CatalogResult;
use crate::providers::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleStats {
    /// Distinct urls.
    pub pages: usize,
    /// All entries, variants included.
    pub entries: usize,
    pub pages_not_in_sitemap: usize,
    /// Distinct product urls.
    pub products: usize,
    /// Product entries beyond the first one per url.
    pub variants: usize,
    /// Entries with matches, counted once per provider that matched.
    pub entries_with_sellers: usize,
    /// Entries with matches from at least one provider, counted once.
    pub entries_with_any_seller: usize,
    /// Entries without a type.
    pub other_pages: usize,
    /// `"<type>s"` counters for every non-product type.
    #[serde(flatten)]
    pub by_type: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<DateTime<Utc>>,
}

impl LocaleStats {
    pub fn compute(entries: &[CatalogEntry]) -> Self {
        let mut stats = LocaleStats::default();
        let mut urls = HashSet::new();
        let mut product_urls = HashSet::new();
        let mut product_entries = 0usize;

        for entry in entries {
            urls.insert(entry.url.as_str());

            if entry.is_product() {
                product_entries += 1;
                product_urls.insert(entry.url.as_str());
            } else if !entry.entry_type.is_empty() {
                *stats.by_type.entry(format!("{}s", entry.entry_type)).or_insert(0) += 1;
            } else {
                stats.other_pages += 1;
            }

            if !entry.in_xml_sitemap {
                stats.pages_not_in_sitemap += 1;
            }

            let matched = ProviderKind::ALL
                .iter()
                .filter(|kind| entry.has_sellers(**kind))
                .count();
            stats.entries_with_sellers += matched;
            if matched > 0 {
                stats.entries_with_any_seller += 1;
            }
        }

        stats.pages = urls.len();
        stats.entries = entries.len();
        stats.products = product_urls.len();
        stats.variants = product_entries - product_urls.len();
        stats.computed_at = Some(Utc::now());
        stats
    }

    /// Counter for a non-product type, by its plural bucket name.
    pub fn bucket(&self, plural: &str) -> usize {
        self.by_type.get(plural).copied().unwrap_or(0)
    }
}

/// Recompute and store the stats of the locale at `locale_url`.
///
/// Returns `None` when no locale has that url.
pub fn refresh_stats(store: &CatalogStore, locale_url: &str) -> CatalogResult<Option<LocaleStats>> {
    let entries = store.entries_for_locale_url(locale_url)?;
    let stats = LocaleStats::compute(&entries);
    if store.save_locale_stats(locale_url, &stats)? {
        Ok(Some(stats))
    } else {
        Ok(None)
    }
}

/// Fire-and-forget stats refresh. Failures are logged, never returned.
///
/// Runs on the blocking pool when a tokio runtime is available, otherwise
/// inline on the calling thread.
pub fn spawn_refresh(store: CatalogStore, locale_url: String) -> Option<tokio::task::JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn_blocking(move || log_refresh(&store, &locale_url))),
        Err(_) => {
            log_refresh(&store, &locale_url);
            None
        }
    }
}

fn log_refresh(store: &CatalogStore, locale_url: &str) {
    match refresh_stats(store, locale_url) {
        Ok(Some(stats)) => info!(
            locale_url,
            pages = stats.pages,
            entries = stats.entries,
            "locale stats updated"
        ),
        Ok(None) => warn!(locale_url, "locale stats not updated: locale not found"),
        Err(err) => warn!(locale_url, error = %err, "error while updating locale stats"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntrySource, ProviderMatchBlock};
    use serde_json::json;

    fn entry(entry_type: &str, url: &str) -> CatalogEntry {
        CatalogEntry::new("l", "https://ex.com", url, EntrySource::Feed).with_type(entry_type)
    }

    #[test]
    fn test_products_variants_and_type_buckets() {
        let entries = vec![
            entry("product", "u1"),
            entry("product", "u1"),
            entry("article", "u2"),
        ];
        let stats = LocaleStats::compute(&entries);

        assert_eq!(stats.products, 1);
        assert_eq!(stats.variants, 1);
        assert_eq!(stats.bucket("articles"), 1);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.other_pages, 0);
        assert_eq!(stats.pages_not_in_sitemap, 3);
    }

    #[test]
    fn test_untyped_entries_count_as_other_pages() {
        let mut stub = entry("", "u3");
        stub.in_xml_sitemap = true;
        let stats = LocaleStats::compute(&[stub]);
        assert_eq!(stats.other_pages, 1);
        assert_eq!(stats.pages_not_in_sitemap, 0);
        assert!(stats.by_type.is_empty());
    }

    #[test]
    fn test_entries_with_sellers_counts_once_per_matching_provider() {
        let block = ProviderMatchBlock {
            ok: true,
            last_scan: Utc::now(),
            matches: vec![json!({"retailer": "Shop"})],
        };
        let mut both = entry("product", "u1");
        both.set_block(ProviderKind::BinLite, block.clone());
        both.set_block(ProviderKind::PriceSpider, block.clone());
        let mut empty_block = entry("product", "u2");
        empty_block.set_block(ProviderKind::SmartCommerce, ProviderMatchBlock { matches: vec![], ..block });

        let stats = LocaleStats::compute(&[both, empty_block]);
        assert_eq!(stats.entries_with_sellers, 2);
        assert_eq!(stats.entries_with_any_seller, 1);
    }

    #[test]
    fn test_serialized_buckets_are_flat() {
        let stats = LocaleStats::compute(&[entry("article", "u1")]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["articles"], 1);
        assert_eq!(json["pagesNotInSitemap"], 1);
    }

    #[tokio::test]
    async fn test_spawned_refresh_stores_snapshot() {
        use crate::entities::{LocaleDraft, LocaleRecord};
        use crate::versioned::Actor;

        let store = CatalogStore::open_in_memory().unwrap();
        let locale = LocaleRecord::create(
            LocaleDraft::new("Acme", "en-us", "https://ex.com/en-us/"),
            &Actor::Admin,
            None,
        )
        .unwrap();
        store.insert_locale(&locale).unwrap();
        store
            .insert_entry(&CatalogEntry::discovered(&locale.id, locale.url_value(), "https://ex.com/en-us/a"))
            .unwrap();

        let handle = spawn_refresh(store.clone(), locale.url_value().to_string()).unwrap();
        handle.await.unwrap();

        let saved = store.find_locale_by_id(&locale.id).unwrap().unwrap();
        assert_eq!(saved.stats.map(|s| s.pages), Some(1));
    }

    #[test]
    fn test_refresh_for_unknown_locale_is_none() {
        let store = CatalogStore::open_in_memory().unwrap();
        assert_eq!(refresh_stats(&store, "https://nope.com/").unwrap(), None);
        assert!(spawn_refresh(store, "https://nope.com/".into()).is_none());
    }
}
