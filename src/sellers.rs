// 🛒 Seller Scans - Fan provider lookups out over a locale's products
//
// Lookups run concurrently but results are reassembled in entry order.
// Failures stay per-item data; only locating the locale or entry, or a
// missing credential, fails the whole call.

use crate::config::AppConfig;
use crate::db::{CatalogStore, EntryQuery};
use crate::entities::{CatalogEntry, LocaleRecord, ProviderMatchBlock};
use crate::error::{CatalogError, CatalogResult};
use crate::providers::http::HttpSellerLookup;
use crate::providers::{LookupOutcome, LookupResult, ProviderKind, ProviderMatch, SellerLookup};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on in-flight lookups per batch.
pub const MAX_CONCURRENT_LOOKUPS: usize = 16;

// ============================================================================
// REGISTRY
// ============================================================================

/// Configured adapters, keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn SellerLookup>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP adapter for every provider with a URL template.
    pub fn from_config(config: &AppConfig) -> Self {
        ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| {
                config.provider_template(kind).map(|template| {
                    Arc::new(HttpSellerLookup::new(kind, template, config.http_timeout))
                        as Arc<dyn SellerLookup>
                })
            })
            .fold(Self::new(), Self::with_adapter)
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SellerLookup>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> CatalogResult<Arc<dyn SellerLookup>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| CatalogError::UpstreamProvider {
            provider: kind.display_name().to_string(),
            message: "provider endpoint is not configured".into(),
        })
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleScan {
    pub entry: CatalogEntry,
    pub lookup: LookupResult,
}

impl SingleScan {
    pub fn matches_count(&self) -> usize {
        self.lookup.matches.len()
    }
}

/// One product of a batch scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanItem {
    pub id: String,
    pub url: String,
    pub product_id: String,
    pub ok: bool,
    pub matches_count: usize,
    pub matches: Vec<ProviderMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanItem {
    fn new(entry: &CatalogEntry, product_id: &str, lookup: LookupResult) -> Self {
        ScanItem {
            id: entry.id.clone(),
            url: entry.url.clone(),
            product_id: product_id.to_string(),
            ok: lookup.ok,
            matches_count: lookup.matches.len(),
            matches: lookup.matches,
            status: lookup.status,
            message: lookup.message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScanReport {
    /// Product entries of the locale.
    pub products: usize,
    /// Products that carried the identifier field and were looked up.
    pub scanned: usize,
    /// Provider blocks written back.
    pub updated: usize,
    pub succeeded: Vec<ScanItem>,
    pub no_matches: Vec<ScanItem>,
    pub failed: Vec<ScanItem>,
    /// Lookups that answered but whose result could not be stored.
    pub persist_failed: Vec<ScanItem>,
}

impl BatchScanReport {
    pub fn counts(&self) -> serde_json::Value {
        serde_json::json!({
            "productsCount": self.products,
            "scannedCount": self.scanned,
            "updatedProductsCount": self.updated,
            "succeededCount": self.succeeded.len(),
            "noMatchesCount": self.no_matches.len(),
            "failedCount": self.failed.len(),
            "persistFailedCount": self.persist_failed.len(),
        })
    }
}

// ============================================================================
// SCANNER
// ============================================================================

pub struct SellerScanner<'a> {
    store: &'a CatalogStore,
    registry: &'a ProviderRegistry,
}

impl<'a> SellerScanner<'a> {
    pub fn new(store: &'a CatalogStore, registry: &'a ProviderRegistry) -> Self {
        SellerScanner { store, registry }
    }

    /// Look up sellers for exactly one entry and store the result on it.
    pub async fn scan_entry(
        &self,
        kind: ProviderKind,
        query: &EntryQuery,
        id_field: &str,
    ) -> CatalogResult<SingleScan> {
        let mut found = self.store.find_entries(query)?;
        if found.len() > 1 {
            return Err(CatalogError::ambiguous(
                "Multiple products found that match the search query.",
                query.to_json(),
                found.iter().map(CatalogEntry::candidate_summary).collect(),
            ));
        }
        let Some(mut entry) = found.pop() else {
            return Err(CatalogError::not_found_for(
                "No products found that match the search query.",
                query.to_json(),
            ));
        };

        let locale = self.store.find_locale_by_id(&entry.locale)?.ok_or_else(|| {
            CatalogError::not_found_for(
                "No locale found that owns this product.",
                serde_json::json!({ "id": entry.locale }),
            )
        })?;
        let credential = require_credential(&locale, kind)?;
        let adapter = self.registry.get(kind)?;

        let product_id = entry
            .field_value(id_field)
            .map(str::to_string)
            .ok_or_else(|| {
                CatalogError::validation(format!(
                    "Product {} has no value for field {id_field}.",
                    entry.url
                ))
            })?;

        let lookup = adapter.lookup(credential, &product_id).await;
        let block = ProviderMatchBlock::from_lookup(&lookup, Utc::now());
        self.store.update_provider_block(&entry.id, kind, &block)?;
        entry.set_block(kind, block);

        info!(
            provider = %kind,
            entry_id = %entry.id,
            ok = lookup.ok,
            matches = lookup.matches.len(),
            "single seller scan finished"
        );
        Ok(SingleScan { entry, lookup })
    }

    /// Look up every product of the locale at `locale_url` that has `id_field`.
    pub async fn scan_locale(
        &self,
        kind: ProviderKind,
        locale_url: &str,
        id_field: &str,
    ) -> CatalogResult<BatchScanReport> {
        let locale = self.store.find_locale_by_url(locale_url)?.ok_or_else(|| {
            CatalogError::not_found_for(
                "No products or locales found that match the search query.",
                serde_json::json!({ "url": locale_url }),
            )
        })?;
        let credential = require_credential(&locale, kind)?;
        let adapter = self.registry.get(kind)?;

        let products: Vec<CatalogEntry> = self
            .store
            .entries_for_locale_url(locale_url)?
            .into_iter()
            .filter(CatalogEntry::is_product)
            .collect();

        let targets: Vec<(&CatalogEntry, String)> = products
            .iter()
            .filter_map(|e| e.field_value(id_field).map(|id| (e, id.to_string())))
            .collect();

        // `buffered` yields in input order regardless of completion order.
        let lookup_futures: Vec<_> = targets
            .iter()
            .map(|(_, product_id)| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.lookup(credential, product_id).await }
            })
            .collect();
        let lookups: Vec<LookupResult> = stream::iter(lookup_futures)
            .buffered(MAX_CONCURRENT_LOOKUPS)
            .collect()
            .await;

        let mut report = BatchScanReport {
            products: products.len(),
            scanned: targets.len(),
            ..Default::default()
        };
        let scanned_at = Utc::now();

        for ((entry, product_id), lookup) in targets.iter().zip(lookups) {
            let block = ProviderMatchBlock::from_lookup(&lookup, scanned_at);
            let stored = match self.store.update_provider_block(&entry.id, kind, &block) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    warn!(entry_id = %entry.id, "entry vanished during seller scan");
                    Err("The product was removed before its result could be stored.".to_string())
                }
                Err(err) => {
                    warn!(entry_id = %entry.id, error = %err, "could not store seller scan");
                    Err(format!("The result could not be stored: {err}"))
                }
            };

            let outcome = lookup.outcome();
            let mut item = ScanItem::new(entry, product_id, lookup);
            if let Err(message) = stored {
                item.message = Some(message);
                report.persist_failed.push(item);
                continue;
            }
            report.updated += 1;
            match outcome {
                LookupOutcome::Succeeded => report.succeeded.push(item),
                LookupOutcome::NoMatches => report.no_matches.push(item),
                LookupOutcome::Failed => report.failed.push(item),
            }
        }

        info!(
            provider = %kind,
            locale_url,
            scanned = report.scanned,
            succeeded = report.succeeded.len(),
            no_matches = report.no_matches.len(),
            failed = report.failed.len(),
            persist_failed = report.persist_failed.len(),
            "batch seller scan finished"
        );
        Ok(report)
    }
}

fn require_credential(locale: &LocaleRecord, kind: ProviderKind) -> CatalogResult<&str> {
    locale.credential(kind).ok_or_else(|| {
        CatalogError::validation(format!(
            "Locale {} does not have {} related data.",
            locale.url_value(),
            kind.display_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CredentialInput, LocaleDraft};
    use crate::versioned::{Actor, VersionedAttribute};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Answers from a fixed table, slower for lower ids so completion order
    /// differs from input order.
    struct TableLookup;

    #[async_trait]
    impl SellerLookup for TableLookup {
        fn kind(&self) -> ProviderKind {
            ProviderKind::BinLite
        }

        async fn lookup(&self, _credential: &str, product_id: &str) -> LookupResult {
            let delay = 30u64.saturating_sub(product_id.len() as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match product_id {
                "1" => LookupResult::found(vec![json!({"retailer": "Shop"})]),
                "22" => LookupResult::found(vec![]),
                _ => LookupResult::failed(Some(503), "unavailable"),
            }
        }
    }

    fn product(locale: &LocaleRecord, url: &str, mp_id: Option<&str>) -> CatalogEntry {
        let mut data = BTreeMap::new();
        if let Some(id) = mp_id {
            data.insert("mpId".to_string(), VersionedAttribute::initial(id.to_string()));
        }
        CatalogEntry::discovered(&locale.id, locale.url_value(), url)
            .with_type("product")
            .with_data(data)
    }

    fn setup(with_key: bool) -> (CatalogStore, LocaleRecord) {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut creds = CredentialInput::default();
        if with_key {
            creds.binlite_key = Some("bl-key-123456".into());
        }
        let draft = LocaleDraft::new("Acme", "en-us", "https://ex.com/en-us/")
            .with_fields("mpId")
            .with_credentials(creds);
        let locale = LocaleRecord::create(draft, &Actor::Admin, None).unwrap();
        store.insert_locale(&locale).unwrap();
        (store, locale)
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new().with_adapter(Arc::new(TableLookup))
    }

    #[tokio::test]
    async fn test_batch_scan_buckets_in_entry_order() {
        let (store, locale) = setup(true);
        store
            .insert_entries(&[
                product(&locale, "https://ex.com/en-us/a", Some("1")),
                product(&locale, "https://ex.com/en-us/b", Some("22")),
                product(&locale, "https://ex.com/en-us/c", Some("333")),
                product(&locale, "https://ex.com/en-us/d", None),
                CatalogEntry::discovered(&locale.id, locale.url_value(), "https://ex.com/en-us/blog"),
            ])
            .unwrap();

        let registry = registry();
        let report = SellerScanner::new(&store, &registry)
            .scan_locale(ProviderKind::BinLite, locale.url_value(), "mpId")
            .await
            .unwrap();

        assert_eq!(report.products, 4);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.updated, 3);
        assert_eq!(report.succeeded[0].product_id, "1");
        assert_eq!(report.no_matches[0].product_id, "22");
        assert_eq!(report.failed[0].status, Some(503));

        let stored = store.entries_for_locale(&locale.id).unwrap();
        let a = stored.iter().find(|e| e.url.ends_with("/a")).unwrap();
        assert!(a.has_sellers(ProviderKind::BinLite));
        let c = stored.iter().find(|e| e.url.ends_with("/c")).unwrap();
        assert_eq!(c.block(ProviderKind::BinLite).map(|b| b.ok), Some(false));
    }

    /// Deletes the entry it is asked about before answering.
    struct VanishingLookup {
        store: CatalogStore,
        entry_id: String,
    }

    #[async_trait]
    impl SellerLookup for VanishingLookup {
        fn kind(&self) -> ProviderKind {
            ProviderKind::BinLite
        }

        async fn lookup(&self, _credential: &str, product_id: &str) -> LookupResult {
            if product_id == "1" {
                self.store.delete_entries(&[self.entry_id.clone()]).unwrap();
            }
            LookupResult::found(vec![json!({"retailer": "Shop"})])
        }
    }

    #[tokio::test]
    async fn test_unstored_results_are_reported_apart() {
        let (store, locale) = setup(true);
        let doomed = product(&locale, "https://ex.com/en-us/a", Some("1"));
        store
            .insert_entries(&[doomed.clone(), product(&locale, "https://ex.com/en-us/b", Some("2"))])
            .unwrap();

        let registry = ProviderRegistry::new().with_adapter(Arc::new(VanishingLookup {
            store: store.clone(),
            entry_id: doomed.id.clone(),
        }));
        let report = SellerScanner::new(&store, &registry)
            .scan_locale(ProviderKind::BinLite, locale.url_value(), "mpId")
            .await
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].product_id, "2");
        assert_eq!(report.persist_failed.len(), 1);
        assert_eq!(report.persist_failed[0].id, doomed.id);
        assert!(report.persist_failed[0].message.is_some());
        assert_eq!(report.counts()["persistFailedCount"], 1);
        assert_eq!(report.counts()["succeededCount"], 1);
    }

    #[tokio::test]
    async fn test_missing_credential_is_rejected() {
        let (store, locale) = setup(false);
        let registry = registry();
        let err = SellerScanner::new(&store, &registry)
            .scan_locale(ProviderKind::BinLite, locale.url_value(), "mpId")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn test_single_scan_requires_exactly_one_entry() {
        let (store, locale) = setup(true);
        let registry = registry();
        let scanner = SellerScanner::new(&store, &registry);
        let query = EntryQuery {
            url: Some("https://ex.com/en-us/a".into()),
            ..Default::default()
        };

        let err = scanner.scan_entry(ProviderKind::BinLite, &query, "mpId").await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        store
            .insert_entries(&[
                product(&locale, "https://ex.com/en-us/a", Some("1")).with_sku("S1"),
                product(&locale, "https://ex.com/en-us/a", Some("1")).with_sku("S2"),
            ])
            .unwrap();
        let err = scanner.scan_entry(ProviderKind::BinLite, &query, "mpId").await.unwrap_err();
        match err {
            CatalogError::AmbiguousMatch { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_scan_persists_block() {
        let (store, locale) = setup(true);
        let entry = product(&locale, "https://ex.com/en-us/a", Some("1"));
        store.insert_entry(&entry).unwrap();
        let registry = registry();

        let scan = SellerScanner::new(&store, &registry)
            .scan_entry(
                ProviderKind::BinLite,
                &EntryQuery { id: Some(entry.id.clone()), ..Default::default() },
                "mpId",
            )
            .await
            .unwrap();
        assert_eq!(scan.matches_count(), 1);
        assert!(scan.entry.has_sellers(ProviderKind::BinLite));

        let stored = store.find_entries(&EntryQuery { id: Some(entry.id), ..Default::default() }).unwrap();
        assert!(stored[0].has_sellers(ProviderKind::BinLite));
    }

    #[test]
    fn test_registry_from_config_only_enables_templated_providers() {
        let config = AppConfig {
            binlite_url: Some("https://bin.example/api/{{id}}".into()),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        assert!(registry.is_enabled(ProviderKind::BinLite));
        assert!(!registry.is_enabled(ProviderKind::PriceSpider));
        assert_eq!(registry.get(ProviderKind::PriceSpider).unwrap_err().status_code(), 502);
    }
}
