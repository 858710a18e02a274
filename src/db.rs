// 🗄️ Catalog Store - SQLite persistence for locales, entries and API keys
//
// Records are stored as JSON documents next to the handful of columns that
// queries filter on. The document is authoritative; the columns are copies
// refreshed on every write.

use crate::auth::Privilege;
use crate::entities::{CatalogEntry, EntrySource, LocaleRecord, ProviderMatchBlock};
use crate::error::{CatalogError, CatalogResult};
use crate::providers::ProviderKind;
use crate::reconciliation::UpsertIntent;
use crate::stats::LocaleStats;
use crate::telemetry::censor_key;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

pub fn setup_database(conn: &Connection) -> CatalogResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Locales Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS locales (
            id TEXT PRIMARY KEY,
            url_value TEXT UNIQUE NOT NULL,
            doc TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Entries Table (owned by a locale, removed with it)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            locale_id TEXT NOT NULL REFERENCES locales(id) ON DELETE CASCADE,
            locale_url TEXT NOT NULL,
            url TEXT NOT NULL,
            sku TEXT,
            type TEXT NOT NULL DEFAULT '',
            in_xml_sitemap INTEGER NOT NULL DEFAULT 0,
            doc TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // API Keys (stored hashed)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS api_keys (
            key_hash TEXT PRIMARY KEY,
            key_hint TEXT NOT NULL DEFAULT '',
            privilege TEXT NOT NULL,
            issuer TEXT,
            issued_for TEXT NOT NULL DEFAULT 'General viewing',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            deactivated_at TEXT,
            deactivated_by TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_locale_url ON entries(locale_url)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_locale_id ON entries(locale_id)",
        [],
    )?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_entries_url ON entries(url)", [])?;

    Ok(())
}

/// SHA-256 of an API key, hex encoded.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// QUERY TYPES
// ============================================================================

/// `limit`/`skip` window over an entry listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub skip: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            limit: DEFAULT_PAGE_LIMIT,
            skip: 0,
        }
    }
}

impl Pagination {
    /// Clamp raw query values: limit into 1..=100 (default 50), skip to ≥ 0.
    pub fn new(limit: Option<i64>, skip: Option<i64>) -> Self {
        let limit = limit
            .map(|l| l.clamp(1, MAX_PAGE_LIMIT as i64) as usize)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let skip = skip.map(|s| s.max(0) as usize).unwrap_or(0);
        Pagination { limit, skip }
    }
}

/// Entry lookup filters. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub id: Option<String>,
    pub url: Option<String>,
    pub locale_url: Option<String>,
}

impl EntryQuery {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.url.is_none() && self.locale_url.is_none()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut query = serde_json::Map::new();
        if let Some(id) = &self.id {
            query.insert("id".into(), id.clone().into());
        }
        if let Some(url) = &self.url {
            query.insert("url".into(), url.clone().into());
        }
        if let Some(locale_url) = &self.locale_url {
            query.insert("localeUrl".into(), locale_url.clone().into());
        }
        serde_json::Value::Object(query)
    }
}

/// Counts reported after a bulk upsert. Writes are independent, so a batch
/// can partially apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteSummary {
    pub submitted: usize,
    /// Intents that targeted an existing entry id.
    pub matched: usize,
    pub updated: usize,
    pub created: usize,
    pub failed: usize,
}

pub const DEFAULT_ISSUED_FOR: &str = "General viewing";

/// Stored metadata of an API key. The key itself is never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub key_hash: String,
    /// Censored form of the key, for telling keys apart in listings.
    pub key_hint: String,
    pub privilege: Privilege,
    pub issuer: Option<String>,
    pub issued_for: String,
    pub active: bool,
    pub created_at: String,
    pub deactivated_at: Option<String>,
    pub deactivated_by: Option<String>,
}

const KEY_COLUMNS: &str = "key_hash, key_hint, privilege, issuer, issued_for, active, \
                           created_at, deactivated_at, deactivated_by";

fn key_from_row(row: &Row) -> rusqlite::Result<StoredKey> {
    let privilege: String = row.get(2)?;
    Ok(StoredKey {
        key_hash: row.get(0)?,
        key_hint: row.get(1)?,
        privilege: Privilege::parse(&privilege).unwrap_or(Privilege::Read),
        issuer: row.get(3)?,
        issued_for: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        deactivated_at: row.get(7)?,
        deactivated_by: row.get(8)?,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Shared handle on the catalog database.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> CatalogResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> CatalogResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> CatalogResult<Self> {
        setup_database(&conn)?;
        Ok(CatalogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> CatalogResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::persistence("catalog store lock poisoned"))
    }

    // ------------------------------------------------------------------------
    // Locales
    // ------------------------------------------------------------------------

    pub fn insert_locale(&self, locale: &LocaleRecord) -> CatalogResult<()> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO locales (id, url_value, doc, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                locale.id,
                locale.url_value(),
                serde_json::to_string(locale)?,
                locale.created_at.to_rfc3339(),
                locale.updated_at.to_rfc3339(),
            ],
        );

        result.map(|_| ()).map_err(|e| url_conflict(e, locale))
    }

    /// Overwrite a locale document and re-point its entries at its current url.
    pub fn save_locale(&self, locale: &LocaleRecord) -> CatalogResult<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE locales SET url_value = ?2, doc = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    locale.id,
                    locale.url_value(),
                    serde_json::to_string(locale)?,
                    locale.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| url_conflict(e, locale))?;
        if updated == 0 {
            return Err(CatalogError::not_found_for(
                "No locale found that matches the search query.",
                serde_json::json!({ "id": locale.id }),
            ));
        }

        conn.execute(
            "UPDATE entries SET locale_url = ?2 WHERE locale_id = ?1 AND locale_url <> ?2",
            params![locale.id, locale.url_value()],
        )?;
        Ok(())
    }

    pub fn find_locale_by_url(&self, url: &str) -> CatalogResult<Option<LocaleRecord>> {
        let conn = self.lock()?;
        conn.query_row("SELECT doc FROM locales WHERE url_value = ?1", [url], locale_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn find_locale_by_id(&self, id: &str) -> CatalogResult<Option<LocaleRecord>> {
        let conn = self.lock()?;
        conn.query_row("SELECT doc FROM locales WHERE id = ?1", [id], locale_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_locales(&self) -> CatalogResult<Vec<LocaleRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT doc FROM locales ORDER BY created_at, id")?;
        let locales = stmt
            .query_map([], locale_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locales)
    }

    /// Delete the locale at `url` and every entry it owns.
    ///
    /// Returns `(locales_deleted, entries_deleted)`.
    pub fn delete_locale_by_url(&self, url: &str) -> CatalogResult<(usize, usize)> {
        let conn = self.lock()?;
        let entries: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries e JOIN locales l ON e.locale_id = l.id WHERE l.url_value = ?1",
            [url],
            |row| row.get(0),
        )?;
        let locales = conn.execute("DELETE FROM locales WHERE url_value = ?1", [url])?;
        if locales == 0 {
            return Ok((0, 0));
        }
        info!(locale_url = url, entries, "locale deleted");
        Ok((locales, entries as usize))
    }

    /// Store a stats snapshot on the locale at `url`. `false` if there is none.
    ///
    /// Only the `stats` member of the document is replaced, so a concurrent
    /// locale update is never overwritten.
    pub fn save_locale_stats(&self, url: &str, stats: &LocaleStats) -> CatalogResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE locales SET doc = json_set(doc, '$.stats', json(?2)) WHERE url_value = ?1",
            params![url, serde_json::to_string(stats)?],
        )?;
        Ok(updated > 0)
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    pub fn insert_entry(&self, entry: &CatalogEntry) -> CatalogResult<()> {
        let conn = self.lock()?;
        upsert_entry(&conn, entry)?;
        Ok(())
    }

    /// Insert (or overwrite) a batch of entries. Returns how many were written.
    pub fn insert_entries(&self, entries: &[CatalogEntry]) -> CatalogResult<usize> {
        let conn = self.lock()?;
        let mut written = 0;
        for entry in entries {
            upsert_entry(&conn, entry)?;
            written += 1;
        }
        debug!(written, "entries inserted");
        Ok(written)
    }

    pub fn entries_for_locale(&self, locale_id: &str) -> CatalogResult<Vec<CatalogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT doc, locale_url FROM entries WHERE locale_id = ?1 ORDER BY created_at, rowid",
        )?;
        let entries = stmt
            .query_map([locale_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn entries_for_locale_url(&self, locale_url: &str) -> CatalogResult<Vec<CatalogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT doc, locale_url FROM entries WHERE locale_url = ?1 ORDER BY created_at, rowid",
        )?;
        let entries = stmt
            .query_map([locale_url], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn find_entries(&self, query: &EntryQuery) -> CatalogResult<Vec<CatalogEntry>> {
        if query.is_empty() {
            return Err(CatalogError::validation(
                "Provide at least one of id, url or localeUrl.",
            ));
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT doc, locale_url FROM entries
             WHERE (?1 IS NULL OR id = ?1)
               AND (?2 IS NULL OR url = ?2)
               AND (?3 IS NULL OR locale_url = ?3)
             ORDER BY created_at, rowid",
        )?;
        let entries = stmt
            .query_map(params![query.id, query.url, query.locale_url], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// One page of a locale's entries plus the locale's total entry count.
    pub fn page_entries(
        &self,
        locale_url: &str,
        page: Pagination,
    ) -> CatalogResult<(Vec<CatalogEntry>, usize)> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE locale_url = ?1",
            [locale_url],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT doc, locale_url FROM entries WHERE locale_url = ?1
             ORDER BY url, id LIMIT ?2 OFFSET ?3",
        )?;
        let entries = stmt
            .query_map(
                params![locale_url, page.limit as i64, page.skip as i64],
                entry_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total as usize))
    }

    /// Apply reconciliation intents for `locale`, one atomic upsert each.
    ///
    /// A failing intent is counted and logged; the rest of the batch still
    /// applies. Existing entries keep their provider blocks, `active` flag
    /// and creation time.
    pub fn apply_intents(
        &self,
        locale: &LocaleRecord,
        intents: &[UpsertIntent],
    ) -> CatalogResult<BulkWriteSummary> {
        let conn = self.lock()?;
        let now = Utc::now();
        let mut summary = BulkWriteSummary {
            submitted: intents.len(),
            ..Default::default()
        };

        for intent in intents {
            if intent.is_update() {
                summary.matched += 1;
            }

            let existing = conn
                .query_row(
                    "SELECT doc, locale_url FROM entries WHERE id = ?1",
                    [&intent.id],
                    entry_from_row,
                )
                .optional();

            let (mut entry, existed) = match existing {
                Ok(Some(entry)) => (entry, true),
                Ok(None) => {
                    let mut fresh = CatalogEntry::new(
                        &locale.id,
                        locale.url_value(),
                        intent.url.clone(),
                        EntrySource::Feed,
                    );
                    fresh.id = intent.id.clone();
                    (fresh, false)
                }
                Err(err) => {
                    warn!(entry_id = %intent.id, error = %err, "upsert intent skipped");
                    summary.failed += 1;
                    continue;
                }
            };

            entry.locale = locale.id.clone();
            entry.locale_url = locale.url_value().to_string();
            entry.url = intent.url.clone();
            entry.source = EntrySource::Feed;
            entry.entry_type = intent.entry_type.clone();
            entry.sku = intent.sku.clone();
            entry.in_xml_sitemap = intent.in_xml_sitemap;
            entry.data = intent.data.clone();
            entry.updated_at = now;

            match upsert_entry(&conn, &entry) {
                Ok(_) if existed => summary.updated += 1,
                Ok(_) => summary.created += 1,
                Err(err) => {
                    warn!(entry_id = %intent.id, error = %err, "upsert intent failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            locale_url = %locale.url_value(),
            submitted = summary.submitted,
            updated = summary.updated,
            created = summary.created,
            failed = summary.failed,
            "feed intents applied"
        );
        Ok(summary)
    }

    /// Replace one provider block on an entry. `false` if the entry is gone.
    pub fn update_provider_block(
        &self,
        entry_id: &str,
        kind: ProviderKind,
        block: &ProviderMatchBlock,
    ) -> CatalogResult<bool> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                "SELECT doc, locale_url FROM entries WHERE id = ?1",
                [entry_id],
                entry_from_row,
            )
            .optional()?;
        let Some(mut entry) = existing else {
            return Ok(false);
        };
        entry.set_block(kind, block.clone());
        entry.updated_at = Utc::now();
        upsert_entry(&conn, &entry)?;
        Ok(true)
    }

    pub fn delete_entries(&self, ids: &[String]) -> CatalogResult<usize> {
        let conn = self.lock()?;
        let mut deleted = 0;
        for id in ids {
            deleted += conn.execute("DELETE FROM entries WHERE id = ?1", [id])?;
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------------

    /// Register `key`, reactivating it if it already exists.
    pub fn insert_api_key(&self, key: &str, privilege: Privilege, issuer: Option<&str>) -> CatalogResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO api_keys (key_hash, key_hint, privilege, issuer, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(key_hash) DO UPDATE SET privilege = excluded.privilege,
                 issuer = excluded.issuer, active = 1,
                 deactivated_at = NULL, deactivated_by = NULL",
            params![
                hash_key(key),
                censor_key(key),
                privilege.as_str(),
                issuer,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Store a freshly generated key. An existing key is never overwritten.
    pub fn create_api_key(
        &self,
        key: &str,
        privilege: Privilege,
        issuer: &str,
        issued_for: Option<&str>,
    ) -> CatalogResult<StoredKey> {
        let conn = self.lock()?;
        let issued_for = issued_for
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ISSUED_FOR);
        conn.execute(
            "INSERT INTO api_keys (key_hash, key_hint, privilege, issuer, issued_for, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                hash_key(key),
                censor_key(key),
                privilege.as_str(),
                issuer,
                issued_for,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                CatalogError::validation("This API key already exists.")
            }
            e => e.into(),
        })?;

        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
            [hash_key(key)],
            key_from_row,
        )
        .map_err(Into::into)
    }

    /// Mark `key` inactive. Returns false when the key is unknown.
    pub fn deactivate_api_key(&self, key: &str, deactivated_by: &str) -> CatalogResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE api_keys SET active = 0, deactivated_at = ?2, deactivated_by = ?3
             WHERE key_hash = ?1",
            params![hash_key(key), Utc::now().to_rfc3339(), deactivated_by],
        )?;
        Ok(updated > 0)
    }

    pub fn find_api_key(&self, key: &str) -> CatalogResult<Option<StoredKey>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
            [hash_key(key)],
            key_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Every stored key, oldest first.
    pub fn list_api_keys(&self) -> CatalogResult<Vec<StoredKey>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys ORDER BY created_at, key_hash"
        ))?;
        let keys = stmt
            .query_map([], key_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

/// `url_value` is unique, so a constraint failure on a locale write is a url clash.
fn url_conflict(err: rusqlite::Error, locale: &LocaleRecord) -> CatalogError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            CatalogError::validation(format!(
                "A locale with url {} already exists.",
                locale.url_value()
            ))
        }
        e => e.into(),
    }
}

fn upsert_entry(conn: &Connection, entry: &CatalogEntry) -> CatalogResult<usize> {
    let written = conn.execute(
        "INSERT INTO entries (id, locale_id, locale_url, url, sku, type, in_xml_sitemap, doc, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             locale_id = excluded.locale_id,
             locale_url = excluded.locale_url,
             url = excluded.url,
             sku = excluded.sku,
             type = excluded.type,
             in_xml_sitemap = excluded.in_xml_sitemap,
             doc = excluded.doc",
        params![
            entry.id,
            entry.locale,
            entry.locale_url,
            entry.url,
            entry.sku_value(),
            entry.entry_type,
            entry.in_xml_sitemap,
            serde_json::to_string(entry)?,
            entry.created_at.to_rfc3339(),
        ],
    )?;
    Ok(written)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let doc: String = row.get(idx)?;
    serde_json::from_str(&doc)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn locale_from_row(row: &Row<'_>) -> rusqlite::Result<LocaleRecord> {
    json_column(row, 0)
}

/// Entry document with the denormalized locale url taken from its column.
fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let mut entry: CatalogEntry = json_column(row, 0)?;
    entry.locale_url = row.get(1)?;
    Ok(entry)
}
