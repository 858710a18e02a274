// 🛒 Seller Providers - Uniform adapter contract for retailer lookups
//
// Each provider answers "which retailers sell this product?" for one market
// credential and one product identifier. A failed lookup is data, not an
// error: adapters always hand back a LookupResult.

pub mod http;
pub mod payload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use http::HttpSellerLookup;
pub use payload::{decode_payload, PayloadShape};

// ============================================================================
// PROVIDER KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "BINLite")]
    BinLite,
    #[serde(rename = "SC")]
    SmartCommerce,
    #[serde(rename = "PS")]
    PriceSpider,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::SmartCommerce,
        ProviderKind::BinLite,
        ProviderKind::PriceSpider,
    ];

    /// Key under which the match block is stored on an entry.
    pub fn block_key(&self) -> &'static str {
        match self {
            ProviderKind::BinLite => "BINLite",
            ProviderKind::SmartCommerce => "SC",
            ProviderKind::PriceSpider => "PS",
        }
    }

    /// Path segment used by the HTTP API (`/api/1/{segment}/product-data`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            ProviderKind::BinLite => "binlite",
            ProviderKind::SmartCommerce => "sc",
            ProviderKind::PriceSpider => "ps",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.path_segment().eq_ignore_ascii_case(segment))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::BinLite => "BIN Lite",
            ProviderKind::SmartCommerce => "SmartCommerce",
            ProviderKind::PriceSpider => "PriceSpider",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.block_key())
    }
}

// ============================================================================
// LOOKUP RESULT
// ============================================================================

/// Provider-specific match record, kept as opaque JSON.
pub type ProviderMatch = Value;

/// Outcome of one seller lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub ok: bool,
    pub matches: Vec<ProviderMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LookupResult {
    pub fn found(matches: Vec<ProviderMatch>) -> Self {
        LookupResult {
            ok: true,
            matches,
            status: None,
            message: None,
        }
    }

    pub fn failed(status: Option<u16>, message: impl Into<String>) -> Self {
        LookupResult {
            ok: false,
            matches: Vec::new(),
            status,
            message: Some(message.into()),
        }
    }

    pub fn outcome(&self) -> LookupOutcome {
        if !self.ok {
            LookupOutcome::Failed
        } else if self.matches.is_empty() {
            LookupOutcome::NoMatches
        } else {
            LookupOutcome::Succeeded
        }
    }
}

/// The three buckets a batch response reports separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupOutcome {
    Succeeded,
    NoMatches,
    Failed,
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Seller-data adapter for one provider.
///
/// Implementations must never surface transport or decode failures as
/// errors; they become a non-ok [`LookupResult`].
#[async_trait]
pub trait SellerLookup: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn lookup(&self, credential: &str, product_id: &str) -> LookupResult;
}

impl fmt::Debug for dyn SellerLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellerLookup").field("kind", &self.kind()).finish()
    }
}
