//! # Sheetdock CLI
//!
//! The `sheetdock` binary is the primary interface for Sheetdock. It
//! provides commands for database initialization, workbook inspection,
//! uploads, search, history, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! sheetdock --config ./config/sheetdock.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sheetdock init` | Create the SQLite database and run schema migrations |
//! | `sheetdock sheets <file>` | List a workbook's sheet names |
//! | `sheetdock preview <file>` | Show the first non-blank rows of a sheet |
//! | `sheetdock import <file>` | Build-grouped normalization and insert |
//! | `sheetdock bulk <file>` | Naive header-row-0 insert |
//! | `sheetdock search [term]` | Search stored records |
//! | `sheetdock history` | Latest upload batch per file |
//! | `sheetdock builds` | Build markers recognized at upload |
//! | `sheetdock get <id>` | Retrieve a record and its upload batch |
//! | `sheetdock serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sheetdock::models::{Filter, FilterOp};
use sheetdock::{config, get, history, ingest, migrate, search, server, store};

/// Sheetdock CLI — spreadsheet upload, normalization, and search for build
/// result sheets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sheetdock.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sheetdock",
    about = "Sheetdock — spreadsheet upload, normalization, and search for build result sheets",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sheetdock.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the records and build_history
    /// tables. This command is idempotent — running it multiple times is
    /// safe.
    Init,

    /// List a workbook's sheet names in workbook order.
    Sheets {
        /// Path to the xlsx file.
        file: PathBuf,
    },

    /// Show the first non-blank rows of a sheet, for picking the header row
    /// and columns before an import.
    Preview {
        /// Path to the xlsx file.
        file: PathBuf,

        /// Sheet name.
        #[arg(long)]
        sheet: String,

        /// Zero-based row to start reading from.
        #[arg(long, default_value_t = 0)]
        start_row: usize,
    },

    /// Import a sheet with build grouping.
    ///
    /// Walks rows after the header, carries the last seen build marker
    /// forward, projects the selected columns, and stores the surviving
    /// records plus the recognized build markers.
    Import {
        /// Path to the xlsx file.
        file: PathBuf,

        /// Sheet name.
        #[arg(long)]
        sheet: String,

        /// Zero-based header row (rows above it are ignored).
        #[arg(long, default_value_t = 0)]
        start_row: usize,

        /// Comma-separated column names to keep.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Import a sheet naively: row 0 is the header, every following row
    /// becomes a record, no build grouping.
    Bulk {
        /// Path to the xlsx file.
        file: PathBuf,

        /// Sheet name.
        #[arg(long)]
        sheet: String,
    },

    /// Search stored records.
    ///
    /// The free-text term matches any searchable field. Filters are folded
    /// left to right: `--filter field=value:and` narrows, `:or` widens
    /// everything accumulated before it.
    Search {
        /// Free-text term matched against every searchable field.
        term: Option<String>,

        /// Field filter as `field=value[:and|:or]` (repeatable).
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<Filter>,
    },

    /// Show the latest upload batch per file, newest first.
    History,

    /// Show build markers recognized at upload, newest first.
    Builds {
        /// Only markers from this file name.
        #[arg(long)]
        file: Option<String>,
    },

    /// Retrieve a record by id, together with its upload batch.
    Get {
        /// Record id.
        id: String,
    },

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// upload and search API.
    Serve,
}

/// Parses a `field=value[:and|:or]` filter argument.
fn parse_filter(s: &str) -> Result<Filter, String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid filter: no '=' found in '{}'", s))?;
    let field = s[..pos].to_string();
    let rest = &s[pos + 1..];

    let (value, operator) = match rest.rsplit_once(':') {
        Some((value, "and")) => (value, FilterOp::And),
        Some((value, "or")) => (value, FilterOp::Or),
        _ => (rest, FilterOp::And),
    };

    Ok(Filter {
        field,
        value: value.to_string(),
        operator,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sheetdock=info")),
        )
        .init();

    let cli = Cli::parse();

    // Workbook inspection needs no config or database.
    if let Commands::Sheets { file } = &cli.command {
        return ingest::run_sheets(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = store::Store::open(&cfg).await?;
            migrate::run_migrations(&store).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sheets { .. } => unreachable!(),
        Commands::Preview {
            file,
            sheet,
            start_row,
        } => {
            ingest::run_preview(&cfg, &file, &sheet, start_row)?;
        }
        Commands::Import {
            file,
            sheet,
            start_row,
            columns,
        } => {
            ingest::run_import(&cfg, &file, &sheet, start_row, &columns).await?;
        }
        Commands::Bulk { file, sheet } => {
            ingest::run_bulk(&cfg, &file, &sheet).await?;
        }
        Commands::Search { term, filters } => {
            search::run_search(&cfg, term.as_deref(), &filters).await?;
        }
        Commands::History => {
            history::run_history(&cfg).await?;
        }
        Commands::Builds { file } => {
            history::run_builds(&cfg, file.as_deref()).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
