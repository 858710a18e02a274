// 🔤 Shared patterns - URL recognition used by validation and sitemap discovery

use regex::Regex;
use std::sync::LazyLock;

/// A market or page URL accepted as input: scheme or `www.` prefix, host,
/// optional port and path.
pub static VALID_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://|www\.)[A-Za-z0-9.\-]+(?::\d{1,5})?(?:[/?#]\S*)?$")
        .expect("VALID_URL is a valid regex pattern")
});

/// First absolute http(s) URL inside free text (robots.txt bodies).
pub static EMBEDDED_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[A-Za-z0-9.\-]+(?::\d{1,5})?(?:/[^\s<>"']*)?"#)
        .expect("EMBEDDED_URL is a valid regex pattern")
});

/// Trailing `/xx-yy` or `/xx-yy/` locale path segment.
pub static LOCALE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/[a-z]{2}-[a-z]{2}/?$").expect("LOCALE_SEGMENT is a valid regex pattern")
});

pub fn is_valid_url(candidate: &str) -> bool {
    VALID_URL.is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(is_valid_url("https://www.herbalessences.com/en-us/"));
        assert!(is_valid_url("http://127.0.0.1:8080/en-us"));
        assert!(is_valid_url("www.example.com"));
        assert!(!is_valid_url("ftp:/bad"));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_embedded_url_takes_first_absolute_url() {
        let body = "User-agent: *\nDisallow: /admin\nSitemap: https://ex.com/sitemap.xml\nSitemap: https://ex.com/other.xml";
        let found = EMBEDDED_URL.find(body).map(|m| m.as_str());
        assert_eq!(found, Some("https://ex.com/sitemap.xml"));
    }

    #[test]
    fn test_locale_segment_only_matches_at_end() {
        assert!(LOCALE_SEGMENT.is_match("https://ex.com/en-us"));
        assert!(LOCALE_SEGMENT.is_match("https://ex.com/en-us/"));
        assert!(!LOCALE_SEGMENT.is_match("https://ex.com/en-us/products"));
    }
}
