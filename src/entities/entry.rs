// 📄 Catalog Entry Entity - One tracked URL/product/content record of a locale
//
// Identity: `id`. The same url may appear on several entries only when each
// carries its own non-empty SKU (product variants).

use crate::error::{CatalogResult, ErrorCollector};
use crate::providers::{LookupResult, ProviderKind, ProviderMatch};
use crate::versioned::VersionedAttribute;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry type that the stats and the seller scans treat as a product.
pub const PRODUCT_TYPE: &str = "product";

// ============================================================================
// SOURCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Created or last written by a feed import (or entered by an operator).
    Feed,
    /// Found while crawling the market's sitemap.
    Discovered,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Feed => "feed",
            EntrySource::Discovered => "discovered",
        }
    }
}

// ============================================================================
// PROVIDER MATCH BLOCK
// ============================================================================

/// Result of the last seller scan for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMatchBlock {
    pub ok: bool,
    pub last_scan: DateTime<Utc>,
    #[serde(default)]
    pub matches: Vec<ProviderMatch>,
}

impl ProviderMatchBlock {
    pub fn from_lookup(result: &LookupResult, scanned_at: DateTime<Utc>) -> Self {
        ProviderMatchBlock {
            ok: result.ok,
            last_scan: scanned_at,
            matches: result.matches.clone(),
        }
    }
}

// ============================================================================
// CATALOG ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    /// Owning locale id.
    pub locale: String,
    /// Copy of the owner's url, for filtering without a join.
    pub locale_url: String,
    pub url: String,
    pub source: EntrySource,
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(rename = "SKU", default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default)]
    pub in_xml_sitemap: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub data: BTreeMap<String, VersionedAttribute>,
    #[serde(rename = "SC", default, skip_serializing_if = "Option::is_none")]
    pub smart_commerce: Option<ProviderMatchBlock>,
    #[serde(rename = "BINLite", default, skip_serializing_if = "Option::is_none")]
    pub binlite: Option<ProviderMatchBlock>,
    #[serde(rename = "PS", default, skip_serializing_if = "Option::is_none")]
    pub price_spider: Option<ProviderMatchBlock>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl CatalogEntry {
    /// Empty entry owned by `locale_id`.
    pub fn new(locale_id: &str, locale_url: &str, url: impl Into<String>, source: EntrySource) -> Self {
        let now = Utc::now();
        CatalogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            locale: locale_id.to_string(),
            locale_url: locale_url.to_string(),
            url: url.into(),
            source,
            entry_type: String::new(),
            sku: None,
            in_xml_sitemap: false,
            active: true,
            data: BTreeMap::new(),
            smart_commerce: None,
            binlite: None,
            price_spider: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stub for a url found in the market's sitemap.
    pub fn discovered(locale_id: &str, locale_url: &str, url: impl Into<String>) -> Self {
        let mut entry = Self::new(locale_id, locale_url, url, EntrySource::Discovered);
        entry.in_xml_sitemap = true;
        entry
    }

    pub fn with_type(mut self, entry_type: impl Into<String>) -> Self {
        self.entry_type = entry_type.into();
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        let sku = sku.into();
        self.sku = (!sku.is_empty()).then_some(sku);
        self
    }

    pub fn with_data(mut self, data: BTreeMap<String, VersionedAttribute>) -> Self {
        self.data = data;
        self
    }

    /// SKU, if present and non-empty.
    pub fn sku_value(&self) -> Option<&str> {
        self.sku.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_product(&self) -> bool {
        self.entry_type == PRODUCT_TYPE
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(|a| a.non_empty())
    }

    pub fn block(&self, kind: ProviderKind) -> Option<&ProviderMatchBlock> {
        match kind {
            ProviderKind::SmartCommerce => self.smart_commerce.as_ref(),
            ProviderKind::BinLite => self.binlite.as_ref(),
            ProviderKind::PriceSpider => self.price_spider.as_ref(),
        }
    }

    pub fn set_block(&mut self, kind: ProviderKind, block: ProviderMatchBlock) {
        let slot = match kind {
            ProviderKind::SmartCommerce => &mut self.smart_commerce,
            ProviderKind::BinLite => &mut self.binlite,
            ProviderKind::PriceSpider => &mut self.price_spider,
        };
        *slot = Some(block);
    }

    /// `true` when the provider's last scan left at least one match.
    pub fn has_sellers(&self, kind: ProviderKind) -> bool {
        self.block(kind).is_some_and(|b| !b.matches.is_empty())
    }

    /// Short JSON summary used as an ambiguity candidate.
    pub fn candidate_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "url": self.url,
            "type": self.entry_type,
            "SKU": self.sku,
            "localeUrl": self.locale_url,
        })
    }
}

// ============================================================================
// INLINE DATA STRINGS
// ============================================================================

/// Parse `"Title:Soap;mpId:558575"` into fresh attributes.
///
/// Only the first `:` of a pair separates name from value, so values may
/// contain colons (urls). Blank pairs are skipped.
pub fn parse_inline_data(raw: &str) -> CatalogResult<BTreeMap<String, VersionedAttribute>> {
    let now = Utc::now();
    let mut errors = ErrorCollector::new();
    let mut data = BTreeMap::new();

    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                data.insert(
                    name.trim().to_string(),
                    VersionedAttribute::initial_at(value.trim().to_string(), now),
                );
            }
            _ => {
                errors.add("data", pair, "Expected Field:value.");
            }
        }
    }

    errors.finish("Page data is malformed.")?;
    Ok(data)
}
