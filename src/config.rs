// ⚙️ Config - Process configuration read from the environment

use crate::error::{CatalogError, CatalogResult};
use crate::providers::ProviderKind;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "catalog.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Runtime settings shared by the CLI and the server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    /// Key that grants admin privileges. `None` disables admin access.
    pub master_key: Option<String>,
    pub http_timeout: Duration,
    /// URL templates with an `{{id}}` placeholder. Absent = provider disabled.
    pub binlite_url: Option<String>,
    pub smartcommerce_url: Option<String>,
    pub pricespider_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            master_key: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            binlite_url: None,
            smartcommerce_url: None,
            pricespider_url: None,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and then read the process environment.
    pub fn from_env() -> CatalogResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> CatalogResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_timeout = match non_empty("CATALOG_HTTP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    CatalogError::validation(format!(
                        "CATALOG_HTTP_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                    ))
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let config = AppConfig {
            database_path: non_empty("CATALOG_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            bind_addr: non_empty("CATALOG_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            master_key: non_empty("CATALOG_MASTER_KEY"),
            http_timeout,
            binlite_url: non_empty("BINLITE_URL"),
            smartcommerce_url: non_empty("SMARTCOMMERCE_CAROUSEL_URL"),
            pricespider_url: non_empty("PRICESPIDER_CDN_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CatalogResult<()> {
        for (name, template) in [
            ("BINLITE_URL", &self.binlite_url),
            ("SMARTCOMMERCE_CAROUSEL_URL", &self.smartcommerce_url),
            ("PRICESPIDER_CDN_URL", &self.pricespider_url),
        ] {
            if let Some(t) = template {
                if !t.contains("{{id}}") {
                    return Err(CatalogError::validation(format!(
                        "{name} must contain the {{{{id}}}} placeholder"
                    )));
                }
            }
        }
        Ok(())
    }

    /// URL template configured for a provider, if it is enabled.
    pub fn provider_template(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::BinLite => self.binlite_url.as_deref(),
            ProviderKind::SmartCommerce => self.smartcommerce_url.as_deref(),
            ProviderKind::PriceSpider => self.pricespider_url.as_deref(),
        }
    }
}
