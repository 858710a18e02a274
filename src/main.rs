// Locale Catalog - Command line
// Import feeds, create locales and inspect the store without the API server

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use locale_catalog::auth::Privilege;
use locale_catalog::catalog::{CatalogService, ExportFormat};
use locale_catalog::config::AppConfig;
use locale_catalog::entities::LocaleDraft;
use locale_catalog::parser::parse_feed_file;
use locale_catalog::telemetry;
use locale_catalog::versioned::Actor;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "locale-catalog", version, about = "Per-market catalog reconciliation")]
struct Cli {
    /// SQLite database file (overrides CATALOG_DB_PATH)
    #[arg(long, global = true, env = "CATALOG_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge a CSV/TSV or xlsx feed into an existing locale
    Import {
        #[arg(long)]
        url: String,
        #[arg(long)]
        feed: PathBuf,
        /// Recorded as the author of every change ("admin" or an API key)
        #[arg(long, default_value = "admin")]
        actor: String,
    },
    /// Discover the sitemap and create a locale with its page stubs
    Create {
        #[arg(long)]
        url: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        locale: String,
        /// Comma-separated data fields
        #[arg(long)]
        fields: Option<String>,
        #[arg(long)]
        hreflang: Option<String>,
    },
    /// Print the sitemap url and page urls without storing anything
    Discover {
        #[arg(long)]
        url: String,
        #[arg(long)]
        hreflang: Option<String>,
    },
    /// Recompute and print the stats of a locale
    Stats {
        #[arg(long)]
        url: String,
    },
    /// Write a locale's entries as CSV, or xlsx when --out ends in .xlsx
    Export {
        #[arg(long)]
        url: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Register an API key for the server
    AddKey {
        key: String,
        /// read or readWrite
        #[arg(long, default_value = "read")]
        privilege: String,
        #[arg(long)]
        issuer: Option<String>,
    },
}

fn actor_from(raw: &str) -> Actor {
    if raw == "admin" {
        Actor::Admin
    } else {
        Actor::key(raw)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to read configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let service = CatalogService::from_config(&config)
        .with_context(|| format!("Failed to open database at {:?}", config.database_path))?;

    match cli.command {
        Command::Import { url, feed, actor } => {
            let parsed = parse_feed_file(&feed)
                .with_context(|| format!("Failed to read feed {:?}", feed))?;
            println!("📂 Loaded {} rows from {:?}", parsed.rows.len(), feed);

            let report = service.import_feed_for_url(&url, &parsed, &actor_from(&actor))?;
            println!("✓ Entries before import: {}", report.entries_found);
            println!("✓ Matched: {}", report.summary.matched);
            println!("✓ Updated: {}", report.summary.updated);
            println!("✓ Created: {}", report.summary.created);
            if report.summary.failed > 0 {
                println!("⚠️  Failed writes: {}", report.summary.failed);
            }
            if !report.ignored_columns.is_empty() {
                println!("⚠️  Ignored columns: {}", report.ignored_columns.join(", "));
            }
        }
        Command::Create {
            url,
            brand,
            locale,
            fields,
            hreflang,
        } => {
            let draft = LocaleDraft {
                brand,
                locale,
                url,
                fields,
                ..Default::default()
            };
            let (record, pages) = service
                .create_locale(draft, &Actor::Admin, hreflang.as_deref())
                .await?;
            println!("🎉 Created locale {} ({})", record.url_value(), record.id);
            println!("✓ Pages found in sitemap: {}", pages);
        }
        Command::Discover { url, hreflang } => {
            let found = service.discovery().discover(&url, hreflang.as_deref()).await?;
            println!("🗺️  Sitemap: {}", found.sitemap_url);
            for page in &found.urls {
                println!("{page}");
            }
            println!("✓ {} pages", found.urls.len());
        }
        Command::Stats { url } => {
            let stats = service.stats(&url)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export { url, out } => {
            let file = File::create(&out).with_context(|| format!("Failed to create {:?}", out))?;
            let count = service.export(&url, ExportFormat::for_path(&out), BufWriter::new(file))?;
            println!("✓ Wrote {} entries to {:?}", count, out);
        }
        Command::AddKey {
            key,
            privilege,
            issuer,
        } => {
            let Some(privilege) = Privilege::parse(&privilege) else {
                bail!("privilege must be read or readWrite, got {privilege:?}");
            };
            service
                .store()
                .insert_api_key(&key, privilege, issuer.as_deref())?;
            println!("✓ Key registered with {} privilege", privilege.as_str());
        }
    }

    Ok(())
}
