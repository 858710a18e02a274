// 🗺️ Sitemap Discovery - Market url → robots.txt → sitemap XML → entry stubs
//
// Stub ordering policy: lexicographic by url, exact duplicates removed.

use crate::entities::CatalogEntry;
use crate::error::{CatalogError, CatalogResult};
use crate::patterns::{EMBEDDED_URL, LOCALE_SEGMENT};
use async_trait::async_trait;
use futures_util::future::join_all;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// TRANSPORT
// ============================================================================

/// Fetches text documents (robots.txt, sitemap XML).
#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> CatalogResult<String>;
}

pub struct HttpSitemapFetcher {
    client: reqwest::Client,
}

impl HttpSitemapFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        HttpSitemapFetcher { client }
    }
}

#[async_trait]
impl SitemapFetcher for HttpSitemapFetcher {
    async fn fetch_text(&self, url: &str) -> CatalogResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Discovery(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Discovery(format!("GET {url} responded with {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| CatalogError::Discovery(format!("GET {url}: {e}")))
    }
}

// ============================================================================
// PURE HELPERS
// ============================================================================

/// robots.txt location for a market url, with any trailing locale segment removed.
pub fn robots_url(market_url: &str) -> String {
    let base = LOCALE_SEGMENT.replace(market_url, "");
    if base.ends_with('/') {
        format!("{base}robots.txt")
    } else {
        format!("{base}/robots.txt")
    }
}

/// First absolute url mentioned in a robots.txt body.
pub fn sitemap_url_from_robots(body: &str) -> Option<String> {
    EMBEDDED_URL.find(body).map(|m| m.as_str().to_string())
}

/// Prefix `https://` when the url has no scheme.
pub fn ensure_https(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        url.to_string()
    } else {
        format!("https://{}", url.trim_start_matches('/'))
    }
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<urlset>`: page urls, already language-selected.
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: child sitemap locations.
    Index(Vec<String>),
}

#[derive(Default)]
struct UrlNode {
    loc: Option<String>,
    alternates: Vec<(String, String)>,
}

impl UrlNode {
    /// Alternate link for `hreflang` if the node has alternates, else `<loc>`.
    fn select(self, hreflang: Option<&str>) -> Option<String> {
        match hreflang {
            Some(lang) if !self.alternates.is_empty() => self
                .alternates
                .into_iter()
                .find(|(l, _)| l.eq_ignore_ascii_case(lang))
                .map(|(_, href)| href),
            _ => self.loc,
        }
    }
}

/// Parse sitemap XML, choosing the `hreflang` alternate where present.
pub fn parse_sitemap(xml: &str, hreflang: Option<&str>) -> CatalogResult<SitemapDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = ParseState::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => state.open(e, false),
            Ok(Event::Empty(ref e)) => state.open(e, true),
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map(|t| t.trim().to_string()).unwrap_or_default();
                state.text(text);
            }
            Ok(Event::CData(ref e)) => {
                state.text(String::from_utf8_lossy(e).trim().to_string());
            }
            Ok(Event::End(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                state.close(&local, hreflang);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CatalogError::Discovery(format!(
                    "sitemap XML parse error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(if state.is_index {
        SitemapDocument::Index(state.children)
    } else {
        SitemapDocument::UrlSet(state.urls)
    })
}

#[derive(Default)]
struct ParseState {
    is_index: bool,
    in_loc: bool,
    node: Option<UrlNode>,
    urls: Vec<String>,
    children: Vec<String>,
}

impl ParseState {
    fn open(&mut self, e: &BytesStart<'_>, self_closing: bool) {
        match e.local_name().into_inner() {
            b"sitemapindex" => self.is_index = true,
            b"url" | b"sitemap" if !self_closing => self.node = Some(UrlNode::default()),
            b"loc" => self.in_loc = !self_closing,
            b"link" => {
                let Some(current) = self.node.as_mut() else {
                    return;
                };
                let mut lang = None;
                let mut href = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
                    match attr.key.local_name().into_inner() {
                        b"hreflang" => lang = Some(value),
                        b"href" => href = Some(value),
                        _ => {}
                    }
                }
                if let (Some(l), Some(h)) = (lang, href) {
                    current.alternates.push((l, h));
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: String) {
        if self.in_loc {
            if let Some(current) = self.node.as_mut() {
                current.loc = Some(text);
            }
        }
    }

    fn close(&mut self, local: &str, hreflang: Option<&str>) {
        match local {
            "loc" => self.in_loc = false,
            "url" => {
                if let Some(selected) = self.node.take().and_then(|n| n.select(hreflang)) {
                    self.urls.push(selected);
                }
            }
            "sitemap" => {
                if let Some(loc) = self.node.take().and_then(|n| n.loc) {
                    self.children.push(loc);
                }
            }
            _ => {}
        }
    }
}

/// Order and de-duplicate discovered urls.
pub fn order_urls(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    urls.into_iter()
        .filter(|u| !u.is_empty())
        .map(|u| ensure_https(&u))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ============================================================================
// DISCOVERY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSitemap {
    pub sitemap_url: String,
    /// Page urls in stub order.
    pub urls: Vec<String>,
}

#[derive(Clone)]
pub struct SitemapDiscovery {
    fetcher: Arc<dyn SitemapFetcher>,
}

impl SitemapDiscovery {
    pub fn new<F: SitemapFetcher + 'static>(fetcher: F) -> Self {
        SitemapDiscovery {
            fetcher: Arc::new(fetcher),
        }
    }

    pub fn http(timeout: Duration) -> Self {
        Self::new(HttpSitemapFetcher::new(timeout))
    }

    /// Locate the market's sitemap through its robots.txt.
    pub async fn resolve_sitemap_url(&self, market_url: &str) -> CatalogResult<String> {
        let robots = robots_url(market_url);
        let body = self.fetcher.fetch_text(&robots).await?;
        sitemap_url_from_robots(&body)
            .ok_or_else(|| CatalogError::Discovery(format!("no sitemap url found in {robots}")))
    }

    /// Fetch the sitemap at `sitemap_url`, following one level of sitemap index.
    pub async fn fetch_urls(&self, sitemap_url: &str, hreflang: Option<&str>) -> CatalogResult<Vec<String>> {
        let xml = self.fetcher.fetch_text(sitemap_url).await?;
        let children = match parse_sitemap(&xml, hreflang)? {
            SitemapDocument::UrlSet(urls) => return Ok(order_urls(urls)),
            SitemapDocument::Index(children) => children,
        };

        debug!(sitemap_url, children = children.len(), "following sitemap index");
        let fetches = children.iter().map(|child| async move {
            let xml = self.fetcher.fetch_text(child).await?;
            parse_sitemap(&xml, hreflang)
        });

        let mut urls = Vec::new();
        for (child, result) in children.iter().zip(join_all(fetches).await) {
            match result {
                Ok(SitemapDocument::UrlSet(found)) => urls.extend(found),
                Ok(SitemapDocument::Index(_)) => {
                    warn!(child = %child, "nested sitemap index ignored");
                }
                Err(err) => warn!(child = %child, error = %err, "child sitemap skipped"),
            }
        }
        Ok(order_urls(urls))
    }

    pub async fn discover(&self, market_url: &str, hreflang: Option<&str>) -> CatalogResult<DiscoveredSitemap> {
        let sitemap_url = self.resolve_sitemap_url(market_url).await?;
        let urls = self.fetch_urls(&sitemap_url, hreflang).await?;
        info!(market_url, sitemap_url = %sitemap_url, found = urls.len(), "sitemap discovered");
        Ok(DiscoveredSitemap { sitemap_url, urls })
    }

    /// Stub entries for every url in the market's sitemap.
    pub async fn discover_entries(
        &self,
        locale_id: &str,
        market_url: &str,
        hreflang: Option<&str>,
    ) -> CatalogResult<Vec<CatalogEntry>> {
        let found = self.discover(market_url, hreflang).await?;
        Ok(stubs_for(locale_id, market_url, &found.urls))
    }
}

pub fn stubs_for(locale_id: &str, market_url: &str, urls: &[String]) -> Vec<CatalogEntry> {
    urls.iter()
        .map(|url| CatalogEntry::discovered(locale_id, market_url, url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" xmlns:xhtml="http://www.w3.org/1999/xhtml">
  <url>
    <loc>https://ex.com/en-us/b</loc>
    <xhtml:link rel="alternate" hreflang="en-us" href="https://ex.com/en-us/b"/>
    <xhtml:link rel="alternate" hreflang="fr-ca" href="https://ex.com/fr-ca/b"/>
  </url>
  <url>
    <loc>ex.com/en-us/a</loc>
  </url>
  <url>
    <loc>https://ex.com/en-us/b</loc>
  </url>
</urlset>"#;

    #[test]
    fn test_robots_url_strips_trailing_locale() {
        assert_eq!(robots_url("https://ex.com/en-us/"), "https://ex.com/robots.txt");
        assert_eq!(robots_url("https://ex.com/en-us"), "https://ex.com/robots.txt");
        assert_eq!(robots_url("https://ex.com/"), "https://ex.com/robots.txt");
        assert_eq!(robots_url("https://ex.com"), "https://ex.com/robots.txt");
    }

    #[test]
    fn test_ensure_https() {
        assert_eq!(ensure_https("ex.com/a"), "https://ex.com/a");
        assert_eq!(ensure_https("https://ex.com/a"), "https://ex.com/a");
        assert_eq!(ensure_https("http://ex.com/a"), "http://ex.com/a");
    }

    #[test]
    fn test_parse_uses_loc_without_hreflang() {
        let doc = parse_sitemap(SITEMAP, None).unwrap();
        assert_eq!(
            doc,
            SitemapDocument::UrlSet(vec![
                "https://ex.com/en-us/b".into(),
                "ex.com/en-us/a".into(),
                "https://ex.com/en-us/b".into(),
            ])
        );
    }

    #[test]
    fn test_parse_selects_hreflang_alternate() {
        let SitemapDocument::UrlSet(urls) = parse_sitemap(SITEMAP, Some("fr-ca")).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(urls[0], "https://ex.com/fr-ca/b");
        // Nodes without alternates fall back to <loc>.
        assert_eq!(urls[1], "ex.com/en-us/a");
    }

    #[test]
    fn test_order_is_lexicographic_and_deduplicated() {
        let SitemapDocument::UrlSet(urls) = parse_sitemap(SITEMAP, None).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(
            order_urls(urls),
            vec!["https://ex.com/en-us/a".to_string(), "https://ex.com/en-us/b".to_string()]
        );
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>https://ex.com/s1.xml</loc></sitemap>
            <sitemap><loc>https://ex.com/s2.xml</loc></sitemap>
        </sitemapindex>"#;
        assert_eq!(
            parse_sitemap(xml, None).unwrap(),
            SitemapDocument::Index(vec!["https://ex.com/s1.xml".into(), "https://ex.com/s2.xml".into()])
        );
    }

    #[test]
    fn test_malformed_xml_is_a_discovery_error() {
        let err = parse_sitemap("<urlset><url><loc>a</url>", None).unwrap_err();
        assert_eq!(err.code(), "discovery_failed");
    }

    #[tokio::test]
    async fn test_discover_entries_end_to_end() {
        let server = MockServer::start_async().await;
        let sitemap_url = server.url("/sitemap.xml");
        server
            .mock_async(|when, then| {
                when.method(GET).path("/robots.txt");
                then.status(200)
                    .body(format!("User-agent: *\nDisallow: /admin\nSitemap: {sitemap_url}\n"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(SITEMAP);
            })
            .await;

        let discovery = SitemapDiscovery::new(HttpSitemapFetcher::new(Duration::from_secs(5)));
        let market = server.url("/en-us/");
        let stubs = discovery.discover_entries("loc-1", &market, None).await.unwrap();

        assert_eq!(stubs.len(), 2);
        assert!(stubs.iter().all(|s| s.in_xml_sitemap && s.active && s.locale == "loc-1"));
        assert_eq!(stubs[0].locale_url, market);
        assert_eq!(stubs[0].url, "https://ex.com/en-us/a");
    }

    #[tokio::test]
    async fn test_missing_robots_is_a_discovery_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/robots.txt");
                then.status(404);
            })
            .await;

        let discovery = SitemapDiscovery::new(HttpSitemapFetcher::new(Duration::from_secs(5)));
        let err = discovery.resolve_sitemap_url(&server.url("/")).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
