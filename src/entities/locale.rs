// 🌍 Locale Entity - One market/brand configuration
//
// Identity is the record id. Everything else (brand, locale code, url,
// credentials) is a VersionedAttribute so renames and key rotations keep
// their audit trail. `fields` is the whitelist of data columns that feed
// reconciliation is allowed to merge.

use crate::attributes::{FieldSet, NON_REMOVABLE_FIELDS};
use crate::error::{CatalogResult, ErrorCollector};
use crate::patterns::is_valid_url;
use crate::providers::ProviderKind;
use crate::stats::LocaleStats;
use crate::versioned::{apply_optional, Actor, VersionedAttribute};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// PROVIDER CREDENTIALS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartCommerceCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sc_locale: Option<VersionedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sc_button_key: Option<VersionedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sc_carousel_key: Option<VersionedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sc_ec_endpoint_key: Option<VersionedAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinLiteCredentials {
    #[serde(rename = "BINLiteKey", default, skip_serializing_if = "Option::is_none")]
    pub binlite_key: Option<VersionedAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSpiderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps_account_id: Option<VersionedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps_cid: Option<VersionedAttribute>,
}

/// Raw credential inputs shared by creation and update.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialInput {
    pub capitol: Option<String>,
    pub sc_locale: Option<String>,
    pub sc_button_key: Option<String>,
    pub sc_carousel_key: Option<String>,
    pub sc_ec_endpoint_key: Option<String>,
    #[serde(rename = "BINLiteKey")]
    pub binlite_key: Option<String>,
    /// `"<accountId>-<cid>"`
    pub ps_key: Option<String>,
}

impl CredentialInput {
    /// Split the combined PriceSpider key into account id and config id.
    pub fn ps_parts(&self) -> (Option<String>, Option<String>) {
        let Some(key) = self.ps_key.as_deref() else {
            return (None, None);
        };
        let mut parts = key.split('-');
        let account = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        let cid = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        (account, cid)
    }
}

// ============================================================================
// INPUTS
// ============================================================================

/// Everything needed to create a locale.
#[derive(Debug, Clone, Default)]
pub struct LocaleDraft {
    pub brand: String,
    pub locale: String,
    pub url: String,
    pub fields: Option<String>,
    pub third_parties: Option<String>,
    pub credentials: CredentialInput,
}

impl LocaleDraft {
    pub fn new(brand: impl Into<String>, locale: impl Into<String>, url: impl Into<String>) -> Self {
        LocaleDraft {
            brand: brand.into(),
            locale: locale.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn with_third_parties(mut self, third_parties: impl Into<String>) -> Self {
        self.third_parties = Some(third_parties.into());
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialInput) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn validate(&self) -> CatalogResult<()> {
        let mut errors = ErrorCollector::new();
        if self.brand.trim().is_empty() {
            errors.add("brand", &self.brand, "Brand is required.");
        }
        if self.locale.trim().is_empty() {
            errors.add("locale", &self.locale, "Locale is required.");
        }
        if !is_valid_url(&self.url) {
            errors.add("url", &self.url, "Provided Parameter is malformed.");
        }
        errors.finish("Invalid locale input.")
    }
}

/// Partial update of an existing locale. `None` leaves a value untouched.
#[derive(Debug, Clone, Default)]
pub struct LocaleUpdate {
    pub brand: Option<String>,
    pub locale: Option<String>,
    pub new_url: Option<String>,
    /// Comma-separated delta, `-name` removes.
    pub fields: Option<String>,
    pub third_parties: Option<String>,
    pub credentials: CredentialInput,
}

impl LocaleUpdate {
    pub fn validate(&self) -> CatalogResult<()> {
        let mut errors = ErrorCollector::new();
        if let Some(url) = self.new_url.as_deref().filter(|u| !u.is_empty()) {
            if !is_valid_url(url) {
                errors.add("newUrl", url, "Provided Parameter is malformed.");
            }
        }
        errors.finish("Invalid locale input.")
    }
}

// ============================================================================
// LOCALE RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleRecord {
    pub id: String,
    pub created_by: String,
    pub brand: VersionedAttribute,
    pub locale: VersionedAttribute,
    pub url: VersionedAttribute,
    #[serde(default)]
    pub fields: FieldSet,
    #[serde(default)]
    pub third_parties: FieldSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_sitemap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capitol: Option<VersionedAttribute>,
    #[serde(rename = "SC", default)]
    pub smart_commerce: SmartCommerceCredentials,
    #[serde(rename = "BINLite", default)]
    pub binlite: BinLiteCredentials,
    #[serde(rename = "PS", default)]
    pub price_spider: PriceSpiderCredentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<LocaleStats>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocaleRecord {
    pub fn create(draft: LocaleDraft, actor: &Actor, xml_sitemap: Option<String>) -> CatalogResult<Self> {
        Self::create_at(draft, actor, xml_sitemap, Utc::now())
    }

    pub fn create_at(
        draft: LocaleDraft,
        actor: &Actor,
        xml_sitemap: Option<String>,
        now: DateTime<Utc>,
    ) -> CatalogResult<Self> {
        draft.validate()?;

        let initial = |raw: Option<String>| {
            raw.filter(|v| !v.is_empty())
                .map(|v| VersionedAttribute::initial_at(v, now))
        };
        let creds = draft.credentials;
        let (ps_account, ps_cid) = creds.ps_parts();

        Ok(LocaleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_by: actor.to_string(),
            brand: VersionedAttribute::initial_at(draft.brand, now),
            locale: VersionedAttribute::initial_at(draft.locale, now),
            url: VersionedAttribute::initial_at(draft.url, now),
            fields: FieldSet::from_list(draft.fields.as_deref().unwrap_or("")),
            third_parties: FieldSet::from_list(draft.third_parties.as_deref().unwrap_or("")),
            xml_sitemap,
            capitol: initial(creds.capitol),
            smart_commerce: SmartCommerceCredentials {
                sc_locale: initial(creds.sc_locale),
                sc_button_key: initial(creds.sc_button_key),
                sc_carousel_key: initial(creds.sc_carousel_key),
                sc_ec_endpoint_key: initial(creds.sc_ec_endpoint_key),
            },
            binlite: BinLiteCredentials {
                binlite_key: initial(creds.binlite_key),
            },
            price_spider: PriceSpiderCredentials {
                ps_account_id: initial(ps_account),
                ps_cid: initial(ps_cid),
            },
            stats: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update. Returns `true` if anything changed.
    pub fn apply_update(&mut self, update: LocaleUpdate, actor: &Actor) -> CatalogResult<bool> {
        self.apply_update_at(update, actor, Utc::now())
    }

    pub fn apply_update_at(
        &mut self,
        update: LocaleUpdate,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> CatalogResult<bool> {
        update.validate()?;

        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let mut changed = false;

        changed |= self.brand.apply_at(non_empty(update.brand), actor, now);
        changed |= self.locale.apply_at(non_empty(update.locale), actor, now);
        changed |= self.url.apply_at(non_empty(update.new_url), actor, now);

        let fields = self
            .fields
            .update_opt(update.fields.as_deref(), NON_REMOVABLE_FIELDS);
        let third_parties = self.third_parties.update_opt(update.third_parties.as_deref(), &[]);
        changed |= fields != self.fields || third_parties != self.third_parties;
        self.fields = fields;
        self.third_parties = third_parties;

        let creds = update.credentials;
        let (ps_account, ps_cid) = creds.ps_parts();
        changed |= apply_optional(&mut self.capitol, creds.capitol, actor, now);
        let sc = &mut self.smart_commerce;
        changed |= apply_optional(&mut sc.sc_locale, creds.sc_locale, actor, now);
        changed |= apply_optional(&mut sc.sc_button_key, creds.sc_button_key, actor, now);
        changed |= apply_optional(&mut sc.sc_carousel_key, creds.sc_carousel_key, actor, now);
        changed |= apply_optional(&mut sc.sc_ec_endpoint_key, creds.sc_ec_endpoint_key, actor, now);
        changed |= apply_optional(&mut self.binlite.binlite_key, creds.binlite_key, actor, now);
        changed |= apply_optional(&mut self.price_spider.ps_account_id, ps_account, actor, now);
        changed |= apply_optional(&mut self.price_spider.ps_cid, ps_cid, actor, now);

        self.prune_empty_credentials();

        if changed {
            self.updated_at = now;
        }
        Ok(changed)
    }

    /// Drop credential attributes that hold no value; their provider is disabled.
    fn prune_empty_credentials(&mut self) {
        fn prune(slot: &mut Option<VersionedAttribute>) {
            if slot.as_ref().and_then(|a| a.non_empty()).is_none() {
                *slot = None;
            }
        }
        prune(&mut self.capitol);
        prune(&mut self.smart_commerce.sc_button_key);
        prune(&mut self.smart_commerce.sc_carousel_key);
        prune(&mut self.smart_commerce.sc_ec_endpoint_key);
        prune(&mut self.binlite.binlite_key);
        prune(&mut self.price_spider.ps_account_id);
        prune(&mut self.price_spider.ps_cid);
    }

    pub fn url_value(&self) -> &str {
        self.url.as_str()
    }

    pub fn brand_value(&self) -> &str {
        self.brand.as_str()
    }

    /// Credential used for seller lookups, if the provider is enabled here.
    pub fn credential(&self, kind: ProviderKind) -> Option<&str> {
        let slot = match kind {
            ProviderKind::BinLite => &self.binlite.binlite_key,
            ProviderKind::SmartCommerce => &self.smart_commerce.sc_carousel_key,
            ProviderKind::PriceSpider => &self.price_spider.ps_account_id,
        };
        slot.as_ref().and_then(|a| a.non_empty())
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.credential(kind).is_some()
    }
}

// ============================================================================
// SORTING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocaleSortKey {
    CreatedAt,
    UpdatedAt,
    Url,
    Brand,
    Locale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleSort {
    pub key: LocaleSortKey,
    pub descending: bool,
}

/// Parse a sort expression such as `"-createdAt,brand"`.
///
/// Unknown keys are ignored.
pub fn parse_locale_sort(expr: &str) -> Vec<LocaleSort> {
    expr.split(',')
        .map(str::trim)
        .filter_map(|item| {
            let (descending, name) = match item.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, item),
            };
            let key = match name {
                "createdAt" => LocaleSortKey::CreatedAt,
                "updatedAt" => LocaleSortKey::UpdatedAt,
                "url" => LocaleSortKey::Url,
                "brand" => LocaleSortKey::Brand,
                "locale" => LocaleSortKey::Locale,
                _ => return None,
            };
            Some(LocaleSort { key, descending })
        })
        .collect()
}

/// Sort locales by the given keys; with no keys, by brand (case-insensitive).
pub fn sort_locales(locales: &mut [LocaleRecord], sorts: &[LocaleSort]) {
    if sorts.is_empty() {
        locales.sort_by_cached_key(|l| l.brand_value().to_lowercase());
        return;
    }

    locales.sort_by(|a, b| {
        sorts
            .iter()
            .map(|s| {
                let ord = match s.key {
                    LocaleSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
                    LocaleSortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                    LocaleSortKey::Url => a.url_value().cmp(b.url_value()),
                    LocaleSortKey::Brand => a.brand_value().cmp(b.brand_value()),
                    LocaleSortKey::Locale => a.locale.as_str().cmp(b.locale.as_str()),
                };
                if s.descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}
