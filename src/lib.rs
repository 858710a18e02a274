// Locale Catalog - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod attributes;     // Versioned attribute merge rules
pub mod auth;           // API key privileges
pub mod catalog;        // Service layer shared by CLI and server
pub mod config;
pub mod db;
pub mod entities;       // Locales and catalog entries
pub mod envelope;
pub mod error;
pub mod matching;       // Feed row → entry identity
pub mod parser;         // CSV/TSV and xlsx feeds
pub mod patterns;
pub mod providers;      // Seller lookup adapters
pub mod reconciliation; // Feed merge planning
pub mod sellers;        // Provider scans over stored entries
pub mod sitemap;        // robots.txt + sitemap discovery
pub mod stats;
pub mod telemetry;
pub mod versioned;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use catalog::{CatalogService, EntryInput, ExportFormat, LocaleSubmission};
pub use db::{setup_database, CatalogStore, EntryQuery, Pagination};
pub use entities::{CatalogEntry, LocaleDraft, LocaleRecord};
pub use envelope::Envelope;
pub use error::{CatalogError, CatalogResult};
pub use parser::{parse_feed_bytes, parse_feed_file, parse_feed_str, Feed};
pub use providers::{LookupResult, ProviderKind, SellerLookup};
pub use reconciliation::FeedReconciler;
pub use sitemap::SitemapDiscovery;
pub use stats::LocaleStats;
pub use versioned::{Actor, VersionedAttribute};
