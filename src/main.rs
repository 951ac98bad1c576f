// 🏷️ rms-pricing CLI
// init-db | import-lro | import-reva | state-change | show

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rms_pricing::{
    load_complimentary_credits, load_internal_prices, setup_database, units_pricing_by_property, ComplimentaryCredit,
    ImportConfig, ImportReport, PricingImporter, SqliteCatalog,
};

#[derive(Parser, Debug)]
#[command(name = "rms-pricing", version, about = "Rent-matrix pricing import")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "RMS_PRICING_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, env = "RMS_PRICING_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema
    InitDb,

    /// Import RMS feed files, one after the other
    ImportLro {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Price a property's inventories from internal prices
    ImportReva {
        #[arg(long)]
        property: String,
        #[arg(long)]
        prices: PathBuf,
        #[arg(long)]
        credits: Option<PathBuf>,
        /// Five weekly windows, +20% each
        #[arg(long)]
        decaying: bool,
    },

    /// Re-price inventories whose state changed
    StateChange {
        #[arg(long)]
        property: String,
        #[arg(long = "inventory", required = true)]
        inventories: Vec<String>,
        #[arg(long)]
        prices: PathBuf,
        #[arg(long)]
        credits: Option<PathBuf>,
    },

    /// List stored pricing rows of a property
    Show {
        #[arg(long)]
        property: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ImportConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    setup_database(&conn).context("Failed to set up database")?;

    match cli.command {
        Command::InitDb => {
            println!("✓ Database initialized at {}", config.database_path.display());
        }

        Command::ImportLro { files } => {
            let importer = PricingImporter::new(SqliteCatalog, &config);
            let report = importer.handle_rms_files(&mut conn, &files);

            println!("📂 RMS import");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("✓ Uploaded:  {}", report.uploaded);
            println!("✓ Processed: {}", report.processed);
            for error in &report.errors {
                println!(
                    "  ❌ {} [{}] {}: {}",
                    error.file,
                    error.error,
                    error.external_id.as_deref().unwrap_or("-"),
                    error.message
                );
            }
            if !report.failing_files.is_empty() {
                println!("⚠️  Failing files: {}", report.failing_files.join(", "));
            }
        }

        Command::ImportReva {
            property,
            prices,
            credits,
            decaying,
        } => {
            if decaying {
                config.simulate_decaying_availability = true;
            }
            let importer = PricingImporter::new(SqliteCatalog, &config);
            let prices = load_internal_prices(&prices).context("Failed to load internal prices")?;
            let credits = load_credits(credits.as_deref())?;

            let report = importer.import_reva_pricing(&mut conn, &property, prices, credits)?;
            print_import_report(&report);
        }

        Command::StateChange {
            property,
            inventories,
            prices,
            credits,
        } => {
            let importer = PricingImporter::new(SqliteCatalog, &config);
            let prices = load_internal_prices(&prices).context("Failed to load internal prices")?;
            let credits = load_credits(credits.as_deref())?;

            let report = importer.import_inventory_state_change(&mut conn, &property, &inventories, prices, credits)?;
            print_import_report(&report);
        }

        Command::Show { property } => {
            let rows = units_pricing_by_property(&conn, &property)?;
            println!("📊 {} pricing rows for property {}", rows.len(), property);
            for row in rows {
                let pricing = &row.pricing;
                println!(
                    "  {:<12} {:<8} {:<18} {:>4}mo std {}  min {} ({} → {})",
                    pricing.external_id,
                    pricing.pricing_type().as_str(),
                    pricing.status.as_str(),
                    pricing.standard_lease_length.months(),
                    pricing.standard_rent,
                    pricing.min_rent,
                    pricing.min_rent_start_date,
                    pricing.min_rent_end_date,
                );
            }
        }
    }

    Ok(())
}

fn load_credits(path: Option<&Path>) -> Result<Vec<ComplimentaryCredit>> {
    match path {
        Some(path) => load_complimentary_credits(path).context("Failed to load complimentary credits"),
        None => Ok(Vec::new()),
    }
}

fn print_import_report(report: &ImportReport) {
    println!("💰 {:?} for property {}", report.event, report.property_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Synthesized: {}", report.synthesized);
    println!("✓ Deleted:     {}", report.reconcile.deleted);
    println!("✓ Persisted:   {}", report.reconcile.persisted);
    for error in &report.errors {
        println!("  ❌ {} [{}]: {}", error.external_id, error.kind, error.messages.join("; "));
    }
}
