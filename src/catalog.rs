// 🧭 Catalog Service - Locale, entry and seller operations over one store
//
// Every mutating operation ends by scheduling a detached stats refresh for
// the affected locale. The refresh never changes the operation's result.

use crate::config::AppConfig;
use crate::db::{BulkWriteSummary, CatalogStore, EntryQuery, Pagination};
use crate::entities::{
    parse_inline_data, parse_locale_sort, sort_locales, CatalogEntry, CredentialInput, EntrySource,
    LocaleDraft, LocaleRecord, LocaleUpdate,
};
use crate::error::{CatalogError, CatalogResult, ErrorCollector};
use crate::parser::Feed;
use crate::patterns::is_valid_url;
use crate::providers::ProviderKind;
use crate::reconciliation::FeedReconciler;
use crate::sellers::{BatchScanReport, ProviderRegistry, SellerScanner, SingleScan};
use crate::sitemap::{stubs_for, SitemapDiscovery};
use crate::stats::{spawn_refresh, LocaleStats};
use crate::versioned::{Actor, VersionedAttribute};
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::io::Write;
use tracing::info;

/// Fixed leading columns of a locale export.
pub const EXPORT_COLUMNS: [&str; 5] = ["url", "source", "type", "SKU", "inXmlSitemap"];

/// Sheet name of an xlsx export.
pub const EXPORT_SHEET: &str = "Download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "xlsx" => Some(ExportFormat::Xlsx),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    /// Format implied by a file name; anything but `.xlsx` is CSV.
    pub fn for_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => ExportFormat::Xlsx,
            _ => ExportFormat::Csv,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

// ============================================================================
// INPUTS / OUTPUTS
// ============================================================================

/// Create-or-update request for the locale at `url`, optionally with a feed.
#[derive(Debug, Clone, Default)]
pub struct LocaleSubmission {
    pub url: String,
    pub brand: Option<String>,
    pub locale: Option<String>,
    pub new_url: Option<String>,
    pub fields: Option<String>,
    pub third_parties: Option<String>,
    pub credentials: CredentialInput,
    /// Language tag used to pick sitemap alternates on creation.
    pub hreflang: Option<String>,
    pub feed: Option<Feed>,
}

impl LocaleSubmission {
    pub fn new(url: impl Into<String>) -> Self {
        LocaleSubmission {
            url: url.into(),
            ..Default::default()
        }
    }

    fn draft(&self) -> LocaleDraft {
        LocaleDraft {
            brand: self.brand.clone().unwrap_or_default(),
            locale: self.locale.clone().unwrap_or_default(),
            url: self.url.clone(),
            fields: self.fields.clone(),
            third_parties: self.third_parties.clone(),
            credentials: self.credentials.clone(),
        }
    }

    fn update(&self) -> LocaleUpdate {
        LocaleUpdate {
            brand: self.brand.clone(),
            locale: self.locale.clone(),
            new_url: self.new_url.clone(),
            fields: self.fields.clone(),
            third_parties: self.third_parties.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Entries the locale held before the import.
    pub entries_found: usize,
    #[serde(flatten)]
    pub summary: BulkWriteSummary,
    pub ignored_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReport {
    pub locale: LocaleRecord,
    pub new_locale: bool,
    /// Sitemap stubs created along with a new locale.
    pub pages_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleView {
    #[serde(flatten)]
    pub locale: LocaleRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<CatalogEntry>>,
}

/// Single-entry create/update input. Unset options leave values alone.
#[derive(Debug, Clone, Default)]
pub struct EntryInput {
    pub locale_url: Option<String>,
    pub id: Option<String>,
    pub url: Option<String>,
    pub entry_type: Option<String>,
    pub sku: Option<String>,
    pub active: Option<bool>,
    /// `"Field:value;Field2:value2"`
    pub data: Option<String>,
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct CatalogService {
    store: CatalogStore,
    discovery: SitemapDiscovery,
    providers: ProviderRegistry,
}

impl CatalogService {
    pub fn new(store: CatalogStore, discovery: SitemapDiscovery, providers: ProviderRegistry) -> Self {
        CatalogService {
            store,
            discovery,
            providers,
        }
    }

    /// Open the configured database and wire HTTP collaborators.
    pub fn from_config(config: &AppConfig) -> CatalogResult<Self> {
        let store = CatalogStore::open(&config.database_path)?;
        Ok(Self::new(
            store,
            SitemapDiscovery::http(config.http_timeout),
            ProviderRegistry::from_config(config),
        ))
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn discovery(&self) -> &SitemapDiscovery {
        &self.discovery
    }

    fn refresh_stats(&self, locale_url: &str) {
        spawn_refresh(self.store.clone(), locale_url.to_string());
    }

    // ------------------------------------------------------------------------
    // Locales
    // ------------------------------------------------------------------------

    /// Create the locale when its url is new, otherwise update it; then merge
    /// the feed, if one was given.
    pub async fn submit_locale(&self, submission: LocaleSubmission, actor: &Actor) -> CatalogResult<SubmitReport> {
        require_url("url", &submission.url)?;

        let (locale, new_locale, pages_found) = match self.store.find_locale_by_url(&submission.url)? {
            None => {
                let (locale, pages) = self
                    .create_locale(submission.draft(), actor, submission.hreflang.as_deref())
                    .await?;
                (locale, true, pages)
            }
            Some(mut locale) => {
                if locale.apply_update(submission.update(), actor)? {
                    self.store.save_locale(&locale)?;
                }
                (locale, false, 0)
            }
        };

        let import = match &submission.feed {
            Some(feed) => Some(self.import_feed(&locale, feed, actor)?),
            None => {
                self.refresh_stats(locale.url_value());
                None
            }
        };

        Ok(SubmitReport {
            locale,
            new_locale,
            pages_found,
            import,
        })
    }

    /// Discover the market's sitemap, then store the locale and its stubs.
    ///
    /// Nothing is stored when discovery fails.
    pub async fn create_locale(
        &self,
        draft: LocaleDraft,
        actor: &Actor,
        hreflang: Option<&str>,
    ) -> CatalogResult<(LocaleRecord, usize)> {
        draft.validate()?;
        let found = self.discovery.discover(&draft.url, hreflang).await?;
        let locale = LocaleRecord::create(draft, actor, Some(found.sitemap_url))?;

        self.store.insert_locale(&locale)?;
        let stubs = stubs_for(&locale.id, locale.url_value(), &found.urls);
        let pages = self.store.insert_entries(&stubs)?;

        info!(locale_url = %locale.url_value(), pages, "locale created");
        Ok((locale, pages))
    }

    /// Reconcile `feed` against the locale's entries and apply the result.
    pub fn import_feed(&self, locale: &LocaleRecord, feed: &Feed, actor: &Actor) -> CatalogResult<ImportReport> {
        let existing = self.store.entries_for_locale(&locale.id)?;
        let outcome = FeedReconciler::new(&locale.fields, &existing, actor).reconcile(&feed.rows)?;
        let summary = self.store.apply_intents(locale, &outcome.intents)?;
        self.refresh_stats(locale.url_value());

        Ok(ImportReport {
            entries_found: existing.len(),
            summary,
            ignored_columns: outcome.ignored_columns,
        })
    }

    pub fn import_feed_for_url(&self, locale_url: &str, feed: &Feed, actor: &Actor) -> CatalogResult<ImportReport> {
        let locale = self.require_locale(locale_url)?;
        self.import_feed(&locale, feed, actor)
    }

    /// All locales, brand order unless `sort` says otherwise.
    pub fn list_locales(&self, sort: Option<&str>) -> CatalogResult<Vec<LocaleRecord>> {
        let mut locales = self.store.list_locales()?;
        sort_locales(&mut locales, &parse_locale_sort(sort.unwrap_or("")));
        Ok(locales)
    }

    /// The locale with freshly computed stats and, optionally, its entries.
    pub fn locale_view(&self, url: &str, include_pages: bool) -> CatalogResult<LocaleView> {
        require_url("url", url)?;
        let mut locale = self.require_locale(url)?;
        let mut entries = self.store.entries_for_locale(&locale.id)?;
        locale.stats = Some(LocaleStats::compute(&entries));

        let pages = include_pages.then(|| {
            order_for_view(&mut entries);
            entries
        });
        Ok(LocaleView { locale, pages })
    }

    pub fn stats(&self, url: &str) -> CatalogResult<LocaleStats> {
        let locale = self.require_locale(url)?;
        let entries = self.store.entries_for_locale(&locale.id)?;
        let stats = LocaleStats::compute(&entries);
        self.store.save_locale_stats(url, &stats)?;
        Ok(stats)
    }

    /// Delete the locale and its entries. Returns `(locales, entries)` deleted.
    pub fn delete_locale(&self, url: &str) -> CatalogResult<(usize, usize)> {
        require_url("url", url)?;
        match self.store.delete_locale_by_url(url)? {
            (0, _) => Err(locale_not_found(url)),
            counts => Ok(counts),
        }
    }

    /// Write every entry of the locale at `url` to `out`. Returns the row count.
    pub fn export<W: Write>(&self, url: &str, format: ExportFormat, mut out: W) -> CatalogResult<usize> {
        let entries = self.store.entries_for_locale_url(url)?;
        if entries.is_empty() {
            return Err(locale_not_found(url));
        }
        match format {
            ExportFormat::Csv => write_entries_csv(&entries, out)?,
            ExportFormat::Xlsx => {
                let book = write_entries_xlsx(&entries)?;
                out.write_all(&book)
                    .and_then(|_| out.flush())
                    .map_err(|e| CatalogError::persistence(format!("export write failed: {e}")))?;
            }
        }
        info!(locale_url = url, rows = entries.len(), format = format.extension(), "locale exported");
        Ok(entries.len())
    }

    pub fn export_csv<W: Write>(&self, url: &str, out: W) -> CatalogResult<usize> {
        self.export(url, ExportFormat::Csv, out)
    }

    fn require_locale(&self, url: &str) -> CatalogResult<LocaleRecord> {
        self.store
            .find_locale_by_url(url)?
            .ok_or_else(|| locale_not_found(url))
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    pub fn get_entries(&self, query: &EntryQuery) -> CatalogResult<Vec<CatalogEntry>> {
        let entries = self.store.find_entries(query)?;
        if entries.is_empty() {
            return Err(CatalogError::not_found_for(
                "No pages found that match the search query.",
                query.to_json(),
            ));
        }
        Ok(entries)
    }

    pub fn list_entries(&self, locale_url: &str, page: Pagination) -> CatalogResult<(Vec<CatalogEntry>, usize)> {
        self.require_locale(locale_url)?;
        self.store.page_entries(locale_url, page)
    }

    /// Update the entry named by `input.id`, or create one under `input.locale_url`.
    ///
    /// Returns the stored entry and whether it was created.
    pub fn save_entry(&self, input: EntryInput, actor: &Actor) -> CatalogResult<(CatalogEntry, bool)> {
        let data = input.data.as_deref().map(parse_inline_data).transpose()?;

        if let Some(id) = input.id.as_deref() {
            let query = EntryQuery {
                id: Some(id.to_string()),
                ..Default::default()
            };
            if let Some(mut entry) = self.store.find_entries(&query)?.pop() {
                if let Some(entry_type) = input.entry_type {
                    entry.entry_type = entry_type;
                }
                if let Some(sku) = input.sku {
                    entry = entry.with_sku(sku);
                }
                if let Some(active) = input.active {
                    entry.active = active;
                }
                for (name, attr) in data.unwrap_or_default() {
                    let incoming = attr.value;
                    match entry.data.get_mut(&name) {
                        Some(existing) => {
                            existing.apply(incoming, actor);
                        }
                        None => {
                            if let Some(value) = incoming {
                                entry.data.insert(name, VersionedAttribute::initial(value));
                            }
                        }
                    }
                }
                entry.updated_at = Utc::now();
                self.ensure_variant_identity(&entry)?;
                self.store.insert_entry(&entry)?;
                self.refresh_stats(&entry.locale_url);
                return Ok((entry, false));
            }
        }

        let locale_url = input
            .locale_url
            .as_deref()
            .ok_or_else(|| CatalogError::validation("localeUrl is required to add a page."))?;
        let url = input.url.as_deref().unwrap_or("");
        require_url("pageUrl", url)?;
        let locale = self.require_locale(locale_url)?;

        let mut entry = CatalogEntry::new(&locale.id, locale.url_value(), url, EntrySource::Feed)
            .with_type(input.entry_type.unwrap_or_default())
            .with_sku(input.sku.unwrap_or_default())
            .with_data(data.unwrap_or_default());
        if let Some(id) = input.id {
            entry.id = id;
        }
        if let Some(active) = input.active {
            entry.active = active;
        }

        self.ensure_variant_identity(&entry)?;
        self.store.insert_entry(&entry)?;
        self.refresh_stats(locale.url_value());
        Ok((entry, true))
    }

    /// Two entries of a locale may share a url only with distinct SKUs.
    fn ensure_variant_identity(&self, entry: &CatalogEntry) -> CatalogResult<()> {
        let siblings = self.store.find_entries(&EntryQuery {
            url: Some(entry.url.clone()),
            locale_url: Some(entry.locale_url.clone()),
            ..Default::default()
        })?;
        let clash = siblings.iter().find(|other| {
            other.id != entry.id
                && (other.sku_value().is_none()
                    || entry.sku_value().is_none()
                    || other.sku_value() == entry.sku_value())
        });
        match clash {
            Some(other) => Err(CatalogError::ambiguous(
                "A page with this url already exists; variants need distinct SKUs.",
                serde_json::json!({ "url": entry.url, "SKU": entry.sku }),
                vec![other.candidate_summary()],
            )),
            None => Ok(()),
        }
    }

    /// Delete entries by a comma-separated id list.
    pub fn delete_entries(&self, ids: &str) -> CatalogResult<usize> {
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(CatalogError::validation("At least one page id is required."));
        }

        let locale_urls: Vec<String> = ids
            .iter()
            .filter_map(|id| {
                let query = EntryQuery {
                    id: Some(id.clone()),
                    ..Default::default()
                };
                self.store.find_entries(&query).ok()?.pop().map(|e| e.locale_url)
            })
            .collect();

        let deleted = self.store.delete_entries(&ids)?;
        if deleted == 0 {
            return Err(CatalogError::not_found_for(
                "No pages found that match the search query.",
                serde_json::json!({ "id": ids }),
            ));
        }

        let mut refreshed: Vec<&str> = Vec::new();
        for url in &locale_urls {
            if !refreshed.contains(&url.as_str()) {
                self.refresh_stats(url);
                refreshed.push(url);
            }
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Sellers
    // ------------------------------------------------------------------------

    pub async fn scan_entry(&self, kind: ProviderKind, query: &EntryQuery, id_field: &str) -> CatalogResult<SingleScan> {
        let scan = SellerScanner::new(&self.store, &self.providers)
            .scan_entry(kind, query, id_field)
            .await?;
        self.refresh_stats(&scan.entry.locale_url);
        Ok(scan)
    }

    pub async fn scan_locale(&self, kind: ProviderKind, locale_url: &str, id_field: &str) -> CatalogResult<BatchScanReport> {
        let report = SellerScanner::new(&self.store, &self.providers)
            .scan_locale(kind, locale_url, id_field)
            .await?;
        self.refresh_stats(locale_url);
        Ok(report)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn require_url(attribute: &str, url: &str) -> CatalogResult<()> {
    if url.is_empty() {
        return Err(CatalogError::validation("URL is required."));
    }
    if !is_valid_url(url) {
        let mut errors = ErrorCollector::new();
        errors.add(attribute, url, "Provided Parameter is malformed.");
        return errors.finish("Provided Parameter is malformed.");
    }
    Ok(())
}

fn locale_not_found(url: &str) -> CatalogError {
    CatalogError::not_found_for(
        format!("Locale {url} not found."),
        serde_json::json!({ "url": url }),
    )
}

/// Typed entries first, then by type name; ties keep their stored order.
pub fn order_for_view(entries: &mut [CatalogEntry]) {
    entries.sort_by(|a, b| match (a.entry_type.is_empty(), b.entry_type.is_empty()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => a.entry_type.cmp(&b.entry_type),
    });
}

/// Header and rows of an export: fixed columns, then one column per data
/// field in first-seen order, holding the current value.
fn export_table(entries: &[CatalogEntry]) -> (Vec<&str>, Vec<Vec<&str>>) {
    let mut header: Vec<&str> = EXPORT_COLUMNS.to_vec();
    for entry in entries {
        for name in entry.data.keys() {
            if !header[EXPORT_COLUMNS.len()..].contains(&name.as_str()) {
                header.push(name);
            }
        }
    }

    let rows = entries
        .iter()
        .map(|entry| {
            let mut record = vec![
                entry.url.as_str(),
                entry.source.as_str(),
                entry.entry_type.as_str(),
                entry.sku_value().unwrap_or(""),
                if entry.in_xml_sitemap { "true" } else { "false" },
            ];
            record.extend(
                header[EXPORT_COLUMNS.len()..]
                    .iter()
                    .map(|name| entry.field_value(name).unwrap_or("")),
            );
            record
        })
        .collect();

    (header, rows)
}

pub fn write_entries_csv<W: Write>(entries: &[CatalogEntry], out: W) -> CatalogResult<()> {
    let (header, rows) = export_table(entries);
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&header)?;
    for record in &rows {
        writer.write_record(record)?;
    }

    writer
        .flush()
        .map_err(|e| CatalogError::persistence(format!("export write failed: {e}")))
}

/// Build a one-sheet xlsx workbook of the entries. Blank cells stay empty.
pub fn write_entries_xlsx(entries: &[CatalogEntry]) -> CatalogResult<Vec<u8>> {
    let (header, rows) = export_table(entries);
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| CatalogError::persistence(format!("xlsx export failed: {e}"));

    let mut book = rust_xlsxwriter::Workbook::new();
    let sheet = book.add_worksheet();
    sheet.set_name(EXPORT_SHEET).map_err(xlsx_err)?;
    for (row, cells) in std::iter::once(&header).chain(rows.iter()).enumerate() {
        let row = u32::try_from(row).map_err(|_| CatalogError::persistence("too many rows for xlsx"))?;
        for (col, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let col = u16::try_from(col).map_err(|_| CatalogError::persistence("too many columns for xlsx"))?;
            sheet.write_string(row, col, *value).map_err(xlsx_err)?;
        }
    }
    book.save_to_buffer().map_err(xlsx_err)
}
