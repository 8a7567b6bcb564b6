//! `Cofre` CLI tool for key management and collection migrations.

#![warn(clippy::pedantic, clippy::nursery)]

mod settings;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand, ValueEnum};
use cofre::blind_index::BlindIndex;
use cofre::field::FieldCodec;
use cofre::key_manager::KEY_LEN;
use cofre::migration::MigrationExecutor;
use cofre_store_file::FileStore;
use rand::RngCore;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "cofre", version)]
#[command(about = "Cofre field encryption CLI", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyFormat {
    Hex,
    Base64,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new random master key
    Keygen {
        /// Output encoding
        #[arg(short, long, value_enum, default_value_t = KeyFormat::Hex)]
        format: KeyFormat,
    },
    /// Encrypt a single value into an envelope
    Encrypt {
        /// Plaintext
        value: String,
    },
    /// Decrypt a single envelope (legacy plaintext is echoed back)
    Decrypt {
        /// Envelope
        value: String,
    },
    /// Compute the blind index of a value
    Hash {
        /// Plaintext
        value: String,
    },
    /// Re-encrypt collections in the file store
    Migrate {
        /// Collection to migrate (repeatable; defaults to the configured list)
        #[arg(long = "collection")]
        collections: Vec<String>,
        /// Store directory
        #[arg(long)]
        store_dir: Option<PathBuf>,
        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
        /// Record failing documents and keep going
        #[arg(long)]
        continue_on_error: bool,
        /// Create blind-index indexes after migrating
        #[arg(long)]
        ensure_indexes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    telemetry::init(&settings.log_level, settings.log_format)?;

    match cli.command {
        Commands::Keygen { format } => {
            let mut key = [0u8; KEY_LEN];
            rand::rngs::OsRng.fill_bytes(&mut key);
            match format {
                KeyFormat::Hex => println!("{}", hex::encode(key)),
                KeyFormat::Base64 => {
                    println!("{}", base64::engine::general_purpose::STANDARD.encode(key));
                }
            }
        }
        Commands::Encrypt { value } => {
            let fields = FieldCodec::new(Arc::new(settings.key_manager()?));
            println!("{}", fields.encrypt_string(&value)?);
        }
        Commands::Decrypt { value } => {
            let fields = FieldCodec::new(Arc::new(settings.key_manager()?));
            let opened = fields.open_string(&value);
            if opened.is_legacy() {
                tracing::warn!("value is not an authentic envelope; printing it unchanged");
            }
            println!("{}", opened.into_value());
        }
        Commands::Hash { value } => {
            let index = BlindIndex::new(Arc::new(settings.key_manager()?));
            println!("{}", index.hash_for_search(&value)?);
        }
        Commands::Migrate { collections, store_dir, concurrency, continue_on_error, ensure_indexes } => {
            if let Some(dir) = store_dir {
                settings.store_dir = dir;
            }
            if let Some(concurrency) = concurrency {
                anyhow::ensure!(concurrency > 0, "--concurrency must be > 0");
                settings.concurrency = concurrency;
            }
            settings.continue_on_error |= continue_on_error;
            migrate(&settings, &collections, ensure_indexes).await?;
        }
    }

    Ok(())
}

async fn migrate(settings: &Settings, collections: &[String], ensure_indexes: bool) -> Result<()> {
    let keys = Arc::new(settings.key_manager()?);
    let schemas = settings.schemas(collections)?;
    let store = FileStore::open(&settings.store_dir).with_context(|| {
        format!("failed to open store directory {}", settings.store_dir.display())
    })?;

    let executor = MigrationExecutor::new(Arc::new(store), keys)
        .with_options(settings.migration_options());

    let mut failed = 0;
    for schema in &schemas {
        let report = executor
            .run(schema)
            .await
            .with_context(|| format!("migration of {} aborted", schema.name()))?;
        if ensure_indexes {
            executor
                .ensure_indexes(schema)
                .await
                .with_context(|| format!("failed to create indexes on {}", schema.name()))?;
        }

        println!(
            "{}: {} (rewritten {}, already current {}, legacy values {}, unauthenticated {}, failed {})",
            report.collection,
            report.updated(),
            report.rewritten,
            report.already_current,
            report.legacy_values,
            report.unauthenticated,
            report.failures.len()
        );
        if report.unauthenticated > 0 {
            eprintln!(
                "warning: {} values in {} did not authenticate under the configured key",
                report.unauthenticated, report.collection
            );
        }
        for failure in &report.failures {
            println!("  {}: {}", failure.id, failure.error);
        }
        failed += report.failures.len();
    }

    anyhow::ensure!(failed == 0, "{failed} documents failed to migrate");
    Ok(())
}
