use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod analyze;
mod classify;
mod clean;
mod config;
mod derive;
mod dimensions;
mod fetch;
mod import;
mod prioritize;
mod store;
mod trends;
mod types;
mod utils;

const DATA_FILE: &str = "collect.json";
const AUTHORS_FILE: &str = "authors.json";
const ANALYSIS_FILE: &str = "analysis.json";
const CONFIG_FILE: &str = "cosplay.conl";
const CSV_FILE: &str = "vspo_data.csv";

#[derive(Parser)]
#[command(name = "cosplay-rank")]
#[command(about = "Rank and maintain scraped cosplay posts")]
struct Cli {
    /// Shared records file (JSON array of posts)
    #[arg(short, long, global = true, default_value = DATA_FILE)]
    data: PathBuf,
    /// Threshold overrides (CONL); defaults apply when the file is absent
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate measured posts into the rankings report
    Analyze {
        /// Username -> follower count table
        #[arg(short, long, default_value = AUTHORS_FILE)]
        authors: PathBuf,
        /// Output report file
        #[arg(short, long, default_value = ANALYSIS_FILE)]
        output: PathBuf,
    },
    /// Print the headline rankings to the terminal
    Trends {
        /// Username -> follower count table
        #[arg(short, long, default_value = AUTHORS_FILE)]
        authors: PathBuf,
    },
    /// Merge a spreadsheet CSV export (member, cosplayer, image, url) into the records
    Import {
        #[arg(long, default_value = CSV_FILE)]
        csv: PathBuf,
    },
    /// Move unmeasured posts of the given members to the front of the records
    Prioritize {
        /// Member name to prioritize (repeatable)
        #[arg(short, long = "member", required = true)]
        members: Vec<String>,
    },
    /// Record image width/height for posts that lack them
    Dimensions {
        /// Maximum images to fetch in one run
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// Quiet mode - suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Remove posts whose image the classifier rejects (uses Gemini API)
    Clean {
        /// Seconds to wait between classifier calls
        #[arg(long, default_value_t = 4)]
        delay: u64,
        /// Quiet mode - suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cosplay_rank=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let thresholds = config::Thresholds::load(&cli.config)?;

    match cli.command {
        Commands::Analyze { authors, output } => {
            analyze::run_analyze(&cli.data, &authors, &output, &thresholds)
        }
        Commands::Trends { authors } => trends::run_trends(&cli.data, &authors, &thresholds),
        Commands::Import { csv } => import::run_import(&csv, &cli.data),
        Commands::Prioritize { members } => prioritize::run_prioritize(&cli.data, &members),
        Commands::Dimensions { limit, quiet } => {
            dimensions::run_dimensions(&cli.data, &thresholds, limit, quiet)
        }
        Commands::Clean { delay, quiet } => clean::run_clean(&cli.data, delay, quiet),
    }
}
