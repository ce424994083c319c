//! liteorm CLI - migrate and inspect liteorm databases

use anyhow::Context;
use clap::{Parser, Subcommand};
use liteorm::config::{StoreConfig, CONFIG_FILE};
use liteorm::schema::load_schema;
use liteorm::ui;
use liteorm::Store;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "liteorm")]
#[command(version)]
#[command(about = "Lightweight object-relational persistence over SQLite")]
#[command(long_about = r#"
liteorm keeps SQLite tables in step with record definitions declared in a
TOML schema file, and dumps stored records with nested references resolved.

Example usage:
  liteorm init
  liteorm migrate --schema schema.toml --database app.db
  liteorm tables --database app.db
  liteorm dump User --schema schema.toml --where "name = 'a'"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default liteorm.toml
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Create and extend tables to match a schema file
    Migrate {
        /// Path to the schema file
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Drop columns the schema no longer declares (destroys their data)
        #[arg(long)]
        drop_stale: bool,
    },

    /// List tables and their columns
    Tables {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Print records of one type as JSON
    Dump {
        /// Record type (table) name
        record: String,

        /// Path to the schema file
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// SQL condition selecting the records
        #[arg(short = 'w', long = "where")]
        condition: Option<String>,
    },

    /// Delete records of one type
    Delete {
        /// Record type (table) name
        record: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// SQL condition selecting the records
        #[arg(short = 'w', long = "where")]
        condition: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = run(cli) {
        ui::fail(&err);
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = StoreConfig::load(&config_path)?.unwrap_or_default();
    // Paths in the config are relative to the file itself
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    match cli.command {
        Commands::Init { force } => {
            let defaults = StoreConfig {
                database: Some(liteorm::config::DEFAULT_DATABASE.to_string()),
                schema: Some("schema.toml".to_string()),
                ..Default::default()
            };
            defaults.save(&config_path, force)?;
            ui::done(&format!("wrote {}", config_path.display()));
        }

        Commands::Migrate {
            schema,
            database,
            drop_stale,
        } => {
            let schema = resolve_schema(schema, &config, &base)?;
            let database = database.unwrap_or_else(|| config.database_path(&base));
            let definitions = load_schema(&schema)
                .with_context(|| format!("failed to load schema {}", schema.display()))?;
            tracing::info!(schema = %schema.display(), database = %database.display(), records = definitions.len(), "migrating");

            let mut store = Store::open_with(&database, config.clone())
                .with_context(|| format!("failed to open {}", database.display()))?;
            let report = if drop_stale {
                store.migrate_dropping_stale(&definitions)?
            } else {
                store.migrate(&definitions)?
            };
            println!("{}", ui::render_migration(&report));
        }

        Commands::Tables { database } => {
            let store = open_existing(database, &config, &base)?;

            let tables = store.tables()?;
            if tables.is_empty() {
                ui::notice("database has no tables; run `liteorm migrate` first");
            }
            for table in tables {
                println!();
                println!("{}", ui::render_table_heading(&table, store.count(&table)?));
                println!("{}", ui::table::columns_table(&store.columns(&table)?));
            }
        }

        Commands::Dump {
            record,
            schema,
            database,
            condition,
        } => {
            let mut store = open_existing(database, &config, &base)?;
            if let Ok(schema) = resolve_schema(schema, &config, &base) {
                store.register(&load_schema(&schema)?);
            }

            let records = store.all(&record, condition.as_deref(), [])?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::Delete {
            record,
            database,
            condition,
        } => {
            let store = open_existing(database, &config, &base)?;
            let deleted = store.delete(&record, &condition, [])?;
            ui::done(&format!("deleted {} {} rows", deleted, record));
        }
    }

    Ok(())
}

fn resolve_schema(arg: Option<PathBuf>, config: &StoreConfig, base: &Path) -> anyhow::Result<PathBuf> {
    arg.or_else(|| config.schema_path(base))
        .context("no schema file given (use --schema or set `schema` in liteorm.toml)")
}

/// Open a database for inspection without creating it when the path is wrong
fn open_existing(arg: Option<PathBuf>, config: &StoreConfig, base: &Path) -> anyhow::Result<Store> {
    let database = arg.unwrap_or_else(|| config.database_path(base));
    if !database.is_file() {
        anyhow::bail!("database {} does not exist", database.display());
    }
    Store::open_existing(&database, config.clone())
        .with_context(|| format!("failed to open {}", database.display()))
}
