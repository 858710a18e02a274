// 🏗️ Feed Parser - Tabular feed files → ordered rows of column → raw string
//
// Feeds arrive as CSV/TSV text or as an xlsx workbook (first sheet only).
// The header row names the columns. `url` is required; `SKU` and `type`
// are recognized identity columns; every other column is a candidate data
// field, merged only if the locale whitelists it.

use crate::error::{CatalogError, CatalogResult};
use calamine::{Data, Reader, Xlsx};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

/// One feed row. Blank cells are omitted.
pub type FeedRow = BTreeMap<String, String>;

pub const URL_COLUMN: &str = "url";
pub const SKU_COLUMN: &str = "SKU";
pub const TYPE_COLUMN: &str = "type";

/// Local file header magic that opens every xlsx (zip) workbook.
const WORKBOOK_MAGIC: &[u8] = b"PK\x03\x04";

// ============================================================================
// FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Comma,
    Semicolon,
    Tab,
}

impl FeedFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            FeedFormat::Comma => b',',
            FeedFormat::Semicolon => b';',
            FeedFormat::Tab => b'\t',
        }
    }

    /// Pick the delimiter that splits the header line into the most columns.
    pub fn sniff(header_line: &str) -> Self {
        [FeedFormat::Comma, FeedFormat::Semicolon, FeedFormat::Tab]
            .into_iter()
            .max_by_key(|f| header_line.matches(f.delimiter() as char).count())
            .filter(|f| header_line.contains(f.delimiter() as char))
            .unwrap_or(FeedFormat::Comma)
    }
}

// ============================================================================
// FEED
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    /// Normalized column names in file order.
    pub columns: Vec<String>,
    pub rows: Vec<FeedRow>,
}

impl Feed {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Data columns: everything except the identity columns.
    pub fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| !is_identity_column(c))
    }
}

pub fn is_identity_column(name: &str) -> bool {
    name == URL_COLUMN || name == SKU_COLUMN || name == TYPE_COLUMN
}

/// Canonical spelling of the identity columns; other names pass through.
fn normalize_column(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    for canonical in [URL_COLUMN, SKU_COLUMN, TYPE_COLUMN] {
        if trimmed.eq_ignore_ascii_case(canonical) {
            return canonical.to_string();
        }
    }
    trimmed.to_string()
}

fn require_url_column(columns: &[String]) -> CatalogResult<()> {
    if columns.iter().any(|c| c == URL_COLUMN) {
        return Ok(());
    }
    Err(CatalogError::Feed(format!(
        "missing required column '{URL_COLUMN}' (found: {})",
        columns.join(", ")
    )))
}

/// Pair cells with their column; blank cells and unnamed columns are skipped.
fn build_row<'a>(columns: &[String], cells: impl Iterator<Item = &'a str>) -> FeedRow {
    columns
        .iter()
        .zip(cells)
        .filter(|(name, value)| !name.is_empty() && !value.trim().is_empty())
        .map(|(name, value)| (name.clone(), value.trim().to_string()))
        .collect()
}

pub fn is_workbook(body: &[u8]) -> bool {
    body.starts_with(WORKBOOK_MAGIC)
}

/// Parse an uploaded body: xlsx when it carries the zip magic, text otherwise.
pub fn parse_feed_bytes(body: &[u8]) -> CatalogResult<Feed> {
    if is_workbook(body) {
        return parse_feed_workbook(body);
    }
    let text = std::str::from_utf8(body)
        .map_err(|e| CatalogError::Feed(format!("feed is neither xlsx nor UTF-8 text: {e}")))?;
    parse_feed_str(text)
}

/// Parse a feed from an in-memory body.
pub fn parse_feed_str(body: &str) -> CatalogResult<Feed> {
    let header_line = body.lines().next().unwrap_or("");
    parse_feed_reader(body.as_bytes(), FeedFormat::sniff(header_line))
}

/// Parse a feed file from disk.
pub fn parse_feed_file(path: &Path) -> CatalogResult<Feed> {
    let body = std::fs::read(path).map_err(|e| CatalogError::Feed(format!("{}: {e}", path.display())))?;
    parse_feed_bytes(&body)
}

pub fn parse_feed_reader<R: Read>(reader: R, format: FeedFormat) -> CatalogResult<Feed> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(format.delimiter())
        .from_reader(reader);

    let columns: Vec<String> = rdr.headers()?.iter().map(normalize_column).collect();
    require_url_column(&columns)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let row = build_row(&columns, record?.iter());
        if !row.is_empty() {
            rows.push(row);
        }
    }

    Ok(Feed { columns, rows })
}

// ============================================================================
// WORKBOOKS
// ============================================================================

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse the first sheet of an xlsx workbook. Its first row is the header.
pub fn parse_feed_workbook(body: &[u8]) -> CatalogResult<Feed> {
    let mut workbook = Xlsx::new(Cursor::new(body))
        .map_err(|e| CatalogError::Feed(format!("workbook could not be opened: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| CatalogError::Feed("workbook has no sheets".into()))?
        .map_err(|e| CatalogError::Feed(format!("first sheet could not be read: {e}")))?;

    let mut sheet_rows = range.rows();
    let columns: Vec<String> = sheet_rows
        .next()
        .map(|header| header.iter().map(|c| normalize_column(&cell_text(c))).collect())
        .unwrap_or_default();
    require_url_column(&columns)?;

    let rows = sheet_rows
        .map(|cells| {
            let texts: Vec<String> = cells.iter().map(cell_text).collect();
            build_row(&columns, texts.iter().map(String::as_str))
        })
        .filter(|row| !row.is_empty())
        .collect();

    Ok(Feed { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_rows_and_normalizes_identity_columns() {
        let feed = parse_feed_str("URL,sku,Type,Title\nhttps://ex.com/p1,100,product,Soap\n").unwrap();

        assert_eq!(feed.columns, vec!["url", "SKU", "type", "Title"]);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.rows[0]["url"], "https://ex.com/p1");
        assert_eq!(feed.rows[0]["SKU"], "100");
        assert_eq!(feed.data_columns().collect::<Vec<_>>(), vec!["Title"]);
    }

    #[test]
    fn test_blank_cells_and_rows_are_dropped() {
        let feed = parse_feed_str("url,Title\nhttps://ex.com/a,\n,\nhttps://ex.com/b,B\n").unwrap();
        assert_eq!(feed.len(), 2);
        assert!(!feed.rows[0].contains_key("Title"));
    }

    #[test]
    fn test_missing_url_column_is_a_feed_error() {
        let err = parse_feed_str("Title,SKU\nSoap,1\n").unwrap_err();
        assert_eq!(err.code(), "invalid_feed");
    }

    #[test]
    fn test_semicolon_feeds_are_sniffed() {
        let feed = parse_feed_str("url;Title;mpId\nhttps://ex.com/a;Soap, large;55\n").unwrap();
        assert_eq!(feed.rows[0]["Title"], "Soap, large");
        assert_eq!(feed.rows[0]["mpId"], "55");
    }

    fn workbook(rows: &[&[&str]]) -> Vec<u8> {
        let mut book = rust_xlsxwriter::Workbook::new();
        let sheet = book.add_worksheet();
        for (r, cells) in rows.iter().enumerate() {
            for (c, value) in cells.iter().enumerate() {
                if !value.is_empty() {
                    sheet.write_string(r as u32, c as u16, *value).unwrap();
                }
            }
        }
        book.save_to_buffer().unwrap()
    }

    #[test]
    fn test_workbook_feeds_read_the_first_sheet() {
        let body = workbook(&[
            &["URL", "Sku", "type", "Title"],
            &["https://ex.com/p1", "A1", "product", "Soap"],
            &["", "", "", ""],
            &["https://ex.com/p2", "", "", "Shampoo"],
        ]);
        assert!(is_workbook(&body));

        let feed = parse_feed_bytes(&body).unwrap();
        assert_eq!(feed.columns, vec!["url", "SKU", "type", "Title"]);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.rows[0]["SKU"], "A1");
        assert_eq!(feed.rows[1]["Title"], "Shampoo");
        assert!(!feed.rows[1].contains_key("SKU"));
    }

    #[test]
    fn test_workbook_without_url_column_is_a_feed_error() {
        let body = workbook(&[&["Title", "SKU"], &["Soap", "1"]]);
        let err = parse_feed_bytes(&body).unwrap_err();
        assert_eq!(err.code(), "invalid_feed");
    }

    #[test]
    fn test_numeric_workbook_cells_become_text() {
        let mut book = rust_xlsxwriter::Workbook::new();
        let sheet = book.add_worksheet();
        sheet.write_string(0, 0, "url").unwrap();
        sheet.write_string(0, 1, "mpId").unwrap();
        sheet.write_string(1, 0, "https://ex.com/p1").unwrap();
        sheet.write_number(1, 1, 111).unwrap();
        let feed = parse_feed_workbook(&book.save_to_buffer().unwrap()).unwrap();
        assert_eq!(feed.rows[0]["mpId"], "111");
    }

    #[test]
    fn test_undecodable_bodies_are_feed_errors() {
        assert_eq!(parse_feed_bytes(&[0xff, 0xfe, 0x00]).unwrap_err().code(), "invalid_feed");
        assert_eq!(parse_feed_bytes(b"PK\x03\x04broken").unwrap_err().code(), "invalid_feed");
        assert_eq!(parse_feed_bytes(b"url\nhttps://ex.com/a\n").unwrap().len(), 1);
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let feed = parse_feed_str("url,Title,mpId\nhttps://ex.com/a,Soap\n").unwrap();
        assert_eq!(feed.rows[0].len(), 2);
    }
}
