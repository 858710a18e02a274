// 🌐 HTTP Seller Lookup - One reqwest-backed adapter per configured provider
//
// The endpoint is a URL template: `{{id}}` is replaced by the product
// identifier and `{{key}}` (optional) by the market credential.

use super::payload::decode_payload;
use super::{LookupResult, ProviderKind, ProviderMatch, SellerLookup};
use crate::telemetry::censor_key;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpSellerLookup {
    kind: ProviderKind,
    template: String,
    client: reqwest::Client,
}

impl HttpSellerLookup {
    pub fn new(kind: ProviderKind, template: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        HttpSellerLookup {
            kind,
            template: template.into(),
            client,
        }
    }

    pub fn with_client(kind: ProviderKind, template: impl Into<String>, client: reqwest::Client) -> Self {
        HttpSellerLookup {
            kind,
            template: template.into(),
            client,
        }
    }

    fn endpoint(&self, credential: &str, product_id: &str) -> String {
        self.template
            .replace("{{id}}", &urlencoding::encode(product_id))
            .replace("{{key}}", &urlencoding::encode(credential))
    }

    async fn fetch(&self, credential: &str, product_id: &str) -> Result<Value, LookupResult> {
        let url = self.endpoint(credential, product_id);
        let mut request = self.client.get(&url);
        if self.kind == ProviderKind::BinLite {
            request = request.header("passkey", credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupResult::failed(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupResult::failed(
                Some(status.as_u16()),
                format!("{} responded with {}", self.kind.display_name(), status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupResult::failed(Some(status.as_u16()), e.to_string()))?;

        decode_payload(&body)
            .map(|(shape, value)| {
                debug!(provider = %self.kind, ?shape, "decoded provider payload");
                value
            })
            .map_err(|e| LookupResult::failed(Some(status.as_u16()), e.to_string()))
    }
}

#[async_trait]
impl SellerLookup for HttpSellerLookup {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn lookup(&self, credential: &str, product_id: &str) -> LookupResult {
        match self.fetch(credential, product_id).await {
            Ok(body) => LookupResult::found(extract_matches(self.kind, &body)),
            Err(failure) => {
                warn!(
                    provider = %self.kind,
                    product_id,
                    credential = %censor_key(credential),
                    status = ?failure.status,
                    message = failure.message.as_deref().unwrap_or(""),
                    "seller lookup failed"
                );
                failure
            }
        }
    }
}

// ============================================================================
// MATCH EXTRACTION
// ============================================================================

/// Pull the per-retailer match records out of a decoded provider body.
///
/// Unknown shapes yield no matches rather than an error.
pub fn extract_matches(kind: ProviderKind, body: &Value) -> Vec<ProviderMatch> {
    match kind {
        ProviderKind::BinLite => body
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .cloned()
                    .map(|mut item| {
                        if let Some(obj) = item.as_object_mut() {
                            obj.remove("Retailerlogo");
                        }
                        item
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ProviderKind::SmartCommerce => smart_commerce_matches(body),
        ProviderKind::PriceSpider => match body {
            Value::Array(items) => items.clone(),
            Value::Object(obj) => obj
                .get("sellers")
                .or_else(|| obj.get("matches"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        },
    }
}

fn smart_commerce_matches(body: &Value) -> Vec<ProviderMatch> {
    let included = &body["included"];
    let retailers = included["retailers"].as_array().cloned().unwrap_or_default();

    let Some(product_retailers) = included["product-retailers"].as_array() else {
        return Vec::new();
    };

    product_retailers
        .iter()
        .map(|pr| {
            let attrs = &pr["attributes"];
            let retailer_name = attrs["action-attributes"]
                .as_array()
                .and_then(|list| {
                    list.iter()
                        .find(|a| a["attribute"] == "data-action-retailer")
                })
                .and_then(|a| a["values"].get(0))
                .cloned()
                .unwrap_or(Value::Null);

            let seller = retailers
                .iter()
                .find(|r| r["attributes"]["name"] == retailer_name);

            serde_json::json!({
                "productName": attrs["name"],
                "retailerName": retailer_name,
                "url": attrs["link"],
                "price": attrs["price-string"],
                "logo": seller.map(|s| s["attributes"]["logo"].clone()).unwrap_or(Value::Null),
                "miniLogo": seller.map(|s| s["attributes"]["mini-logo"].clone()).unwrap_or(Value::Null),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn lookup_for(server: &MockServer, kind: ProviderKind, path: &str) -> HttpSellerLookup {
        HttpSellerLookup::new(kind, server.url(path), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_binlite_lookup_strips_logos_and_sends_passkey() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/bin/0037000547501").header("passkey", "secret");
                then.status(200)
                    .json_body(json!([{"Retailer": "Shop", "Retailerlogo": "x.png"}]));
            })
            .await;

        let adapter = lookup_for(&server, ProviderKind::BinLite, "/bin/{{id}}");
        let result = adapter.lookup("secret", "0037000547501").await;

        mock.assert_async().await;
        assert!(result.ok);
        assert_eq!(result.matches, vec![json!({"Retailer": "Shop"})]);
    }

    #[tokio::test]
    async fn test_pricespider_lookup_decodes_callback_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/1766/data/products/123.js");
                then.status(200).body(
                    r#"PriceSpider.onload("product", {"pmid": 123, "sellers": [{"name": "Shop"}]});"#,
                );
            })
            .await;

        let adapter = lookup_for(&server, ProviderKind::PriceSpider, "/{{key}}/data/products/{{id}}.js");
        let result = adapter.lookup("1766", "123").await;

        assert!(result.ok);
        assert_eq!(result.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_data_not_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bin/1");
                then.status(503);
            })
            .await;

        let adapter = lookup_for(&server, ProviderKind::BinLite, "/bin/{{id}}");
        let result = adapter.lookup("k", "1").await;

        assert!(!result.ok);
        assert_eq!(result.status, Some(503));
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_smart_commerce_matches_join_retailer_logos() {
        let body = json!({
            "included": {
                "product-retailers": [{
                    "attributes": {
                        "name": "Soap",
                        "link": "https://shop.example/soap",
                        "price-string": "$3",
                        "action-attributes": [
                            {"attribute": "data-action-retailer", "values": ["Shop"]}
                        ]
                    }
                }],
                "retailers": [{
                    "attributes": {"name": "Shop", "logo": "l.png", "mini-logo": "m.png", "url": "https://shop.example"}
                }]
            }
        });

        let matches = extract_matches(ProviderKind::SmartCommerce, &body);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["retailerName"], "Shop");
        assert_eq!(matches[0]["logo"], "l.png");
        assert_eq!(matches[0]["miniLogo"], "m.png");
    }
}
