//! # Context Ingest CLI (`cingest`)
//!
//! The `cingest` binary is the operator interface to the ingestion
//! engine: it initializes the SQLite database, runs import jobs against
//! the registered source importers, and inspects stored records and
//! their relation edges.
//!
//! ## Usage
//!
//! ```bash
//! cingest --config ./config/cingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cingest init` | Create the SQLite database and run schema migrations |
//! | `cingest importers` | List registered importers per source kind |
//! | `cingest import <kind> <reference>` | Run one import job and print its result |
//! | `cingest query` | List stored records, with filters |
//! | `cingest get <record_id>` | Print one record as JSON |
//! | `cingest related <record_id>` | Walk relation edges from a record |
//! | `cingest remove <record_id>` | Delete every version of a record |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! cingest init
//!
//! # Import a Git repository at a pinned ref
//! cingest import repository https://github.com/serde-rs/serde --option ref=v1.0.0
//!
//! # Crawl a site two levels deep
//! cingest import web https://example.com --option max_depth=2
//!
//! # Import an Obsidian vault with a 5 minute budget
//! cingest import vault ~/notes --timeout-secs 300
//!
//! # Latest version of every web record
//! cingest query --kind web --latest
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use context_ingest::config;
use context_ingest::coordinator::{cancel_flag, Coordinator, ImportRequest, JobStatus};
use context_ingest::core::models::{RelationKind, SourceKind};
use context_ingest::core::store::{ContextStore, RecordFilter};
use context_ingest::migrate;
use context_ingest::registry::ImporterRegistry;
use context_ingest::sqlite_store::SqliteStore;

/// Context Ingest CLI — a pluggable engine for importing heterogeneous
/// personal content into a unified, versioned context store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cingest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cingest",
    about = "Context Ingest — import repositories, web pages, media files, and note vaults into one versioned store",
    version,
    long_about = "Context Ingest runs import jobs against pluggable source importers \
    (git repositories, web crawls, image/video/audio files, Obsidian-style vaults), \
    normalizes everything into content records with stable locator-derived identities, \
    and stores records with monotonic versions and duplicate/derivation edges in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cingest.toml`. Database and workspace paths
    /// are read from this file.
    #[arg(long, global = true, default_value = "./config/cingest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the records and edges tables.
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// List registered importers.
    ///
    /// Shows one line per source kind with the importer's description.
    Importers,

    /// Run one import job.
    ///
    /// Resolves the importer for `<kind>`, streams extracted items into
    /// the store one at a time, and prints the structured job result.
    /// Item-level failures are reported in the result without failing
    /// the job; source-level failures fail it. Ctrl-C cancels between
    /// items, keeping everything already committed.
    Import {
        /// Source kind: `repository`, `web`, `image`, `video`, `audio`, or `vault`.
        kind: SourceKind,

        /// Source reference: a URL, local path, or vault directory,
        /// as the importer for `<kind>` expects.
        reference: String,

        /// Per-kind option as `key=value` (repeatable). Values parse as
        /// JSON where possible, e.g. `--option max_depth=2` or
        /// `--option 'include_globs=["src/**"]'`.
        #[arg(long = "option", value_parser = parse_key_val)]
        options: Vec<(String, String)>,

        /// All options as one JSON object; mutually exclusive with `--option`.
        #[arg(long, conflicts_with = "options")]
        options_json: Option<String>,

        /// Fail the job as a timeout if extraction exceeds this budget.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List stored records.
    ///
    /// Prints one line per record: id, kind, version, and locator,
    /// ordered by import time.
    Query {
        /// Only records of this source kind.
        #[arg(long)]
        kind: Option<SourceKind>,

        /// Only records whose canonical locator starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Only the latest version of each record.
        #[arg(long)]
        latest: bool,

        /// Only records imported at or after this unix timestamp.
        #[arg(long)]
        since: Option<i64>,

        /// Only records imported at or before this unix timestamp.
        #[arg(long)]
        until: Option<i64>,

        /// Maximum number of records to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one record as JSON.
    Get {
        /// Record id (sha-256 hex).
        id: String,

        /// Specific version; defaults to the latest.
        #[arg(long)]
        version: Option<i64>,
    },

    /// Walk relation edges outward from a record.
    ///
    /// Prints the ids reachable by following outgoing edges, optionally
    /// restricted to one relation kind.
    Related {
        /// Record id to start from.
        id: String,

        /// Restrict to `derived_from`, `duplicate_of`, or `part_of`.
        #[arg(long)]
        relation: Option<RelationKind>,
    },

    /// Delete every version of a record and sever its edges.
    Remove {
        /// Record id to delete.
        id: String,
    },
}

/// Parse a `key=value` pair for `--option` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Assemble the raw options value passed to the job. `--option` values
/// are parsed as JSON so numbers and arrays come through typed; anything
/// that fails to parse is kept as a string.
fn build_options(
    pairs: Vec<(String, String)>,
    json: Option<String>,
) -> anyhow::Result<serde_json::Value> {
    if let Some(raw) = json {
        return serde_json::from_str(&raw).context("parsing --options-json");
    }
    if pairs.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    let mut map = serde_json::Map::new();
    for (key, value) in pairs {
        let parsed = serde_json::from_str(&value)
            .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
        map.insert(key, parsed);
    }
    Ok(serde_json::Value::Object(map))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Importers => {
            let registry = ImporterRegistry::with_builtins(&cfg);
            for (kind, description) in registry.list() {
                println!("{:<12} {}", kind.as_str(), description);
            }
        }
        Commands::Import {
            kind,
            reference,
            options,
            options_json,
            timeout_secs,
        } => {
            let registry = Arc::new(ImporterRegistry::with_builtins(&cfg));
            let store: Arc<dyn ContextStore> = Arc::new(SqliteStore::open(&cfg).await?);
            let coordinator = Coordinator::new(registry, store);

            let mut request = ImportRequest::new(kind, reference);
            request.options = build_options(options, options_json)?;
            request.deadline = timeout_secs.map(Duration::from_secs);

            let cancel = cancel_flag();
            let signal_flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancelling after the current item...");
                    signal_flag.store(true, Ordering::SeqCst);
                }
            });

            let result = coordinator.run_cancellable(request, cancel).await;
            println!(
                "job {} {:?}: {} created, {} updated, {} unchanged, {} duplicates, {} item errors",
                result.job_id,
                result.status,
                result.created,
                result.updated,
                result.unchanged,
                result.duplicates,
                result.item_errors.len()
            );
            for item_error in &result.item_errors {
                println!("  item error: {}: {}", item_error.locator, item_error.reason);
            }
            if result.status == JobStatus::Failed {
                bail!(
                    "import failed: {}",
                    result
                        .failure_reason
                        .unwrap_or_else(|| "unknown failure".to_string())
                );
            }
        }
        Commands::Query {
            kind,
            prefix,
            latest,
            since,
            until,
            limit,
        } => {
            let store = open_store(&cfg).await?;
            let filter = RecordFilter {
                source_kind: kind,
                locator_prefix: prefix,
                metadata: None,
                since,
                until,
                latest_only: latest,
            };
            let mut records = store.query(&filter).await?;
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            for record in &records {
                println!(
                    "{}  {:<10} v{:<3} {}",
                    &record.record_id[..12],
                    record.source_kind.as_str(),
                    record.version,
                    record.canonical_locator
                );
            }
            println!("{} record(s)", records.len());
        }
        Commands::Get { id, version } => {
            let store = open_store(&cfg).await?;
            let record = store
                .get(&id, version)
                .await?
                .ok_or_else(|| anyhow!("no record with id '{}'", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Related { id, relation } => {
            let store = open_store(&cfg).await?;
            let related = store.related(&id, relation).await?;
            if related.is_empty() {
                println!("no related records");
            }
            for record_id in related {
                match store.get(&record_id, None).await? {
                    Some(record) => println!(
                        "{}  {:<10} {}",
                        &record.record_id[..12],
                        record.source_kind.as_str(),
                        record.canonical_locator
                    ),
                    None => println!("{}  (missing)", &record_id[..12]),
                }
            }
        }
        Commands::Remove { id } => {
            let store = open_store(&cfg).await?;
            let removed = store.remove(&id).await?;
            println!("removed {} version(s)", removed);
        }
    }

    Ok(())
}

async fn open_store(cfg: &config::Config) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(cfg).await
}
