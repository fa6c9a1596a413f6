mod assign;
mod config;
mod db;
mod enrich;
mod images;
mod import;
mod ipeds;
mod normalize;
mod report;
mod scholarships;
mod transform;
mod validate;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::images::fetch::HttpFetcher;
use crate::report::{format_duration, thousands, truncate};

#[derive(Parser)]
#[command(name = "college_etl", about = "College data ETL and image enrichment")]
struct Cli {
    /// SQLite database (overrides COLLEGE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load raw college documents (JSON array or JSON Lines) into the source collection
    Import {
        file: PathBuf,
        /// Clear the source collection first
        #[arg(long)]
        replace: bool,
    },
    /// Merge IPEDS survey CSVs on UNITID into the source collection
    ImportIpeds {
        /// Institutional characteristics directory file (HD)
        hd: PathBuf,
        /// Admissions and test scores (ADM)
        #[arg(long)]
        adm: Option<PathBuf>,
        /// Student charges for the academic year (IC_AY)
        #[arg(long)]
        ic_ay: Option<PathBuf>,
        /// Fall enrollment by race/ethnicity (EF, part A)
        #[arg(long)]
        ef: Option<PathBuf>,
        /// Clear the source collection first
        #[arg(long)]
        replace: bool,
    },
    /// Rebuild the UI collection from the source collection
    Transform,
    /// Fetch homepages and store an image for each active college
    EnrichImages {
        /// Max colleges to process (default: all active)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Assign branded fallback images to every college, no network
    AssignImages,
    /// Check the scholarship enrichment file; exits 1 on failure
    ValidateEnrichment {
        /// Enrichment file (overrides COLLEGE_ENRICHMENT_FILE)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Rebuild scholarships_ui from raw listings and the enrichment file
    Scholarships {
        /// JSON array of raw scholarships
        #[arg(short, long)]
        source: PathBuf,
        /// Enrichment file (overrides COLLEGE_ENRICHMENT_FILE)
        #[arg(short, long)]
        enrichment: Option<PathBuf>,
    },
    /// Full-text search on college names
    Search {
        query: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show collection counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Import { file, replace } => {
            let conn = db::connect(&settings.db_path)?;
            import::run(&conn, &settings, &file, replace).map(|_| ())
        }
        Commands::ImportIpeds { hd, adm, ic_ay, ef, replace } => {
            let conn = db::connect(&settings.db_path)?;
            let files = ipeds::IpedsFiles { hd, adm, ic_ay, ef };
            ipeds::run(&conn, &settings, &files, replace).map(|_| ())
        }
        Commands::Transform => {
            let conn = db::connect(&settings.db_path)?;
            transform::run(&conn, &settings).map(|_| ())
        }
        Commands::EnrichImages { limit } => {
            let conn = db::connect(&settings.db_path)?;
            let fetcher = HttpFetcher::new(&settings)?;
            enrich::run(&conn, &settings, &fetcher, limit).await.map(|_| ())
        }
        Commands::AssignImages => {
            let conn = db::connect(&settings.db_path)?;
            assign::run(&conn, &settings).map(|_| ())
        }
        Commands::ValidateEnrichment { file } => {
            let path = file.unwrap_or_else(|| settings.enrichment_file.clone());
            let report = validate::run(&path)?;
            if !report.passed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Scholarships { source, enrichment } => {
            let conn = db::connect(&settings.db_path)?;
            let enrichment = enrichment.unwrap_or_else(|| settings.enrichment_file.clone());
            scholarships::run(&conn, &source, &enrichment).map(|_| ())
        }
        Commands::Search { query, limit } => {
            let conn = db::connect(&settings.db_path)?;
            let hits = db::search_by_name(&conn, &settings.target_collection, &query, limit)?;
            if hits.is_empty() {
                println!("No colleges match {:?}.", query);
                return Ok(());
            }
            println!("{:>3} | {:<48} | {:<5} | {}", "#", "College", "State", "URL");
            println!("{}", "-".repeat(100));
            for (i, h) in hits.iter().enumerate() {
                println!(
                    "{:>3} | {:<48} | {:<5} | {}",
                    i + 1,
                    truncate(&h.name, 45),
                    h.state,
                    h.canonical_url
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            let s = db::get_stats(&conn, &settings.source_collection, &settings.target_collection)?;
            println!("Source documents: {}", thousands(s.source));
            println!("UI colleges:      {}", thousands(s.colleges));
            println!("Active:           {}", thousands(s.active));
            println!("With image:       {}", thousands(s.with_image));
            println!("Scholarships:     {}", thousands(s.scholarships));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}
