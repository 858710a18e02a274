// End-to-end catalog flow against mocked market and provider endpoints:
// discover → submit → import → scan → stats → export

use httpmock::prelude::*;
use locale_catalog::catalog::{CatalogService, LocaleSubmission};
use locale_catalog::config::AppConfig;
use locale_catalog::db::CatalogStore;
use locale_catalog::entities::CredentialInput;
use locale_catalog::parser::parse_feed_str;
use locale_catalog::providers::ProviderKind;
use locale_catalog::sellers::ProviderRegistry;
use locale_catalog::sitemap::SitemapDiscovery;
use locale_catalog::versioned::Actor;
use std::time::Duration;

struct Market {
    server: MockServer,
    url: String,
}

impl Market {
    fn page(&self, path: &str) -> String {
        self.server.url(format!("/en-us/{path}"))
    }
}

async fn market() -> Market {
    let server = MockServer::start_async().await;
    let sitemap_url = server.url("/sitemap.xml");
    let urls: String = ["p1", "p2", "about"]
        .iter()
        .map(|p| format!("<url><loc>{}</loc></url>", server.url(format!("/en-us/{p}"))))
        .collect();

    server
        .mock_async(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body(format!("Sitemap: {sitemap_url}\n"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/sitemap.xml");
            then.status(200)
                .body(format!(r#"<?xml version="1.0"?><urlset>{urls}</urlset>"#));
        })
        .await;

    for (id, status, body) in [
        ("111", 200, r#"[{"Retailername":"Shop","Retailerlogo":"logo.png"}]"#),
        ("222", 200, "[]"),
        ("333", 503, "unavailable"),
    ] {
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("/bin/{id}"))
                    .header("passkey", "bin-key");
                then.status(status).body(body);
            })
            .await;
    }

    let url = server.url("/en-us/");
    Market { server, url }
}

fn service(market: &Market) -> CatalogService {
    let template = market.server.url("/bin/{{id}}");
    let config = AppConfig::from_lookup(|key| match key {
        "BINLITE_URL" => Some(template.clone()),
        "CATALOG_HTTP_TIMEOUT_SECS" => Some("5".into()),
        _ => None,
    })
    .unwrap();

    CatalogService::new(
        CatalogStore::open_in_memory().unwrap(),
        SitemapDiscovery::http(Duration::from_secs(5)),
        ProviderRegistry::from_config(&config),
    )
}

fn feed(market: &Market) -> String {
    format!(
        "url,SKU,type,mpId,Title,Color\n\
         {p1},A1,product,111,Soap,Blue\n\
         {p2},B2,product,222,Shampoo,\n\
         {p2},B3,product,333,Shampoo XL,\n",
        p1 = market.page("p1"),
        p2 = market.page("p2"),
    )
}

fn submission(market: &Market, feed: Option<&str>) -> LocaleSubmission {
    LocaleSubmission {
        brand: Some("Acme".into()),
        locale: Some("en-us".into()),
        fields: Some("mpId,Title".into()),
        credentials: CredentialInput {
            binlite_key: Some("bin-key".into()),
            ..Default::default()
        },
        feed: feed.map(|f| parse_feed_str(f).unwrap()),
        ..LocaleSubmission::new(market.url.clone())
    }
}

#[tokio::test]
async fn test_full_catalog_flow() {
    let market = market().await;
    let svc = service(&market);
    let actor = Actor::key("ops-key");

    // Creation discovers the sitemap and stores one stub per page.
    let created = svc.submit_locale(submission(&market, None), &actor).await.unwrap();
    assert!(created.new_locale);
    assert_eq!(created.pages_found, 3);

    // The feed fills two stubs and adds a variant of p2.
    let body = feed(&market);
    let report = svc
        .submit_locale(submission(&market, Some(&body)), &actor)
        .await
        .unwrap()
        .import
        .unwrap();
    assert_eq!(report.entries_found, 3);
    assert_eq!(report.summary.updated, 2);
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.ignored_columns, vec!["Color".to_string()]);

    // Seller scan: one hit, one empty answer, one provider failure.
    let scan = svc
        .scan_locale(ProviderKind::BinLite, &market.url, "mpId")
        .await
        .unwrap();
    assert_eq!(scan.products, 3);
    assert_eq!(scan.scanned, 3);
    assert_eq!(scan.succeeded.len(), 1);
    assert_eq!(scan.no_matches.len(), 1);
    assert_eq!(scan.failed.len(), 1);
    assert_eq!(scan.failed[0].status, Some(503));
    assert!(scan.succeeded[0].matches[0].get("Retailerlogo").is_none());

    let stats = svc.stats(&market.url).unwrap();
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.products, 2);
    assert_eq!(stats.variants, 1);
    assert_eq!(stats.other_pages, 1);
    assert_eq!(stats.entries_with_sellers, 1);

    let mut out = Vec::new();
    assert_eq!(svc.export_csv(&market.url, &mut out).unwrap(), 4);
    let csv = String::from_utf8(out).unwrap();
    assert!(csv.starts_with("url,source,type,SKU,inXmlSitemap"));
    assert!(csv.contains("Shampoo XL"));
}

#[tokio::test]
async fn test_reimport_is_stable() {
    let market = market().await;
    let svc = service(&market);
    let actor = Actor::Admin;
    let body = feed(&market);

    svc.submit_locale(submission(&market, Some(&body)), &actor)
        .await
        .unwrap();
    let again = svc
        .import_feed_for_url(&market.url, &parse_feed_str(&body).unwrap(), &actor)
        .unwrap();

    assert_eq!(again.entries_found, 4);
    assert_eq!(again.summary.created, 0);
    assert_eq!(again.summary.updated, 3);

    let entries = svc.store().entries_for_locale_url(&market.url).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .filter_map(|e| e.data.get("Title"))
        .all(|title| title.history.is_empty()));
}

#[tokio::test]
async fn test_unreachable_market_stores_nothing() {
    let server = MockServer::start_async().await;
    let svc = CatalogService::new(
        CatalogStore::open_in_memory().unwrap(),
        SitemapDiscovery::http(Duration::from_secs(5)),
        ProviderRegistry::new(),
    );

    let err = svc
        .submit_locale(
            LocaleSubmission {
                brand: Some("Acme".into()),
                locale: Some("en-us".into()),
                ..LocaleSubmission::new(server.url("/en-us/"))
            },
            &Actor::Admin,
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 502);
    assert!(svc.list_locales(None).unwrap().is_empty());
}
