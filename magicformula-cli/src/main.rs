//! Magic Formula CLI: universe refresh, validation, retrieval and ranking.
//!
//! Commands:
//! - `universe <csv>`: ingest a screener CSV into the ticker registry
//! - `validate`: apply the dollar-volume and market-cap thresholds
//! - `retrieve`: fetch statements (`--continue` resumes and fetches only gaps)
//! - `rank`: compute metrics, rewrite the database, export the ranking CSV
//! - `status`: registry state counts and stored metric sizes

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use magicformula_core::data::YahooProvider;
use magicformula_core::ranking::RankedRow;
use magicformula_core::ScreenerConfig;
use magicformula_runner::{
    read_plan, run_shard, Pipeline, RetrievalReport, Status, SubprocessLauncher,
};

#[derive(Parser)]
#[command(
    name = "magicformula",
    about = "Magic Formula stock screener: return on capital plus earnings yield"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for checkpoints, the database and the ranking CSV.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Number of retrieval processes.
    #[arg(long, global = true)]
    processes: Option<usize>,

    /// Tickers per provider call (0 = one batch).
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a NASDAQ-screener CSV; new tickers start NOT_VALIDATED.
    Universe {
        /// Path to the screener CSV.
        csv: PathBuf,
    },
    /// Validate tickers against the volume and market-cap thresholds.
    Validate {
        /// Re-validate every ticker, not only new ones.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Retrieve balance sheets, income statements and market caps.
    Retrieve {
        /// Resume: merge leftovers and fetch only what is missing.
        #[arg(long = "continue", default_value_t = false)]
        resume: bool,
    },
    /// Compute metrics, update the database and export the ranking.
    Rank {
        /// Reference date (YYYY-MM-DD) for the recency filter. Defaults to today.
        #[arg(long)]
        today: Option<String>,

        /// Rows to print.
        #[arg(long, default_value_t = 25)]
        top: usize,
    },
    /// Show registry state counts and stored metric sizes.
    Status,
    /// Run one retrieval process from a plan file (used by fan-out).
    #[command(hide = true)]
    Shard {
        #[arg(long)]
        plan: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Shard { plan } = &cli.command {
        return run_shard_cmd(plan);
    }

    let config = load_config(&cli)?;
    let provider = YahooProvider::from_config(&config.provider)?;
    let pipeline = Pipeline::open(config, &provider)?;

    match cli.command {
        Commands::Universe { csv } => {
            let report = pipeline
                .refresh_universe(&csv)
                .with_context(|| format!("loading universe from {}", csv.display()))?;
            println!("Universe: {} rows, {} new tickers", report.rows, report.added);
        }
        Commands::Validate { all } => {
            let report = pipeline.validate(!all)?;
            println!(
                "Validation: {} valid, {} invalid, {} removed, {} deferred",
                report.valid, report.invalid, report.removed, report.deferred
            );
            println!("{}", pipeline.summary(0));
        }
        Commands::Retrieve { resume } => {
            let extra_args = if cli.verbose {
                vec!["--verbose".to_string()]
            } else {
                Vec::new()
            };
            let launcher = SubprocessLauncher::current(extra_args)?;
            let result = if resume {
                pipeline.continue_retrieval(&launcher)
            } else {
                pipeline.retrieve_all(&launcher)
            };
            let report = result?;
            print_retrieval(&report);
            println!("{}", pipeline.summary(0));
        }
        Commands::Rank { today, top } => {
            let today = match today {
                Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .with_context(|| format!("invalid --today {s:?}"))?,
                None => chrono::Local::now().date_naive(),
            };
            let written = pipeline.update_database()?;
            if written == 0 {
                bail!("no fully retrieved tickers; run `retrieve --continue` first");
            }
            let ranked = pipeline.rank(today)?;
            print_ranking(&ranked, top);
            println!(
                "Ranking written to {}",
                pipeline.config().ranking_csv_path().display()
            );
            println!("{}", pipeline.summary(ranked.len()));
        }
        Commands::Status => print_status(&pipeline.status()),
        Commands::Shard { .. } => {}
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ScreenerConfig> {
    let mut config = match &cli.config {
        Some(path) => ScreenerConfig::from_file(path)?,
        None => ScreenerConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(p) = cli.processes {
        config.processes = p;
    }
    if let Some(b) = cli.batch_size {
        config.batch_size = b;
    }
    config.validate()?;
    Ok(config)
}

fn run_shard_cmd(plan_path: &Path) -> Result<()> {
    let plan = read_plan(plan_path)?;
    let provider = YahooProvider::from_config(&plan.config.provider)?;
    let report = run_shard(&plan, &provider)?;
    tracing::info!(
        process = report.index,
        batches = report.batches.len(),
        removed = report.removed,
        "shard complete"
    );
    Ok(())
}

fn print_retrieval(report: &RetrievalReport) {
    println!("=== Retrieval ===");
    println!("Balance sheets requested:    {}", report.plan.balance.len());
    println!("Income statements requested: {}", report.plan.income.len());
    println!("Market caps requested:       {}", report.plan.market_cap.len());
    if report.requeued > 0 {
        println!("Requeued MISSING_INFO:       {}", report.requeued);
    }
    for shard in &report.shards {
        let state = if shard.success { "ok" } else { "FAILED" };
        println!("Process {}: {state} ({})", shard.index, shard.detail);
    }
    println!("Removed:                     {}", report.cleaning.removed.len());
    println!("Missing info:                {}", report.cleaning.missing_info.len());
}

fn print_ranking(rows: &[RankedRow], top: usize) {
    println!(
        "{:>5}  {:<8} {:>9} {:>9} {:>6} {:>6}  {}",
        "Rank", "Ticker", "ROC", "Yield", "rROC", "rYld", "Sector"
    );
    for r in rows.iter().take(top) {
        println!(
            "{:>5}  {:<8} {:>8.1}% {:>8.1}% {:>6} {:>6}  {}",
            r.magic_rank,
            r.row.ticker,
            r.row.roc * 100.0,
            r.row.earnings_yield * 100.0,
            r.roc_rank,
            r.yield_rank,
            r.row.sector.as_deref().unwrap_or("-"),
        );
    }
    if rows.len() > top {
        println!("... {} more", rows.len() - top);
    }
}

fn print_status(status: &Status) {
    let c = &status.counts;
    println!("=== Registry ===");
    println!("NOT_VALIDATED  {}", c.not_validated);
    println!("VALID          {}", c.valid);
    println!("INVALID        {}", c.invalid);
    println!("REMOVE         {}", c.remove);
    println!("MISSING_INFO   {}", c.missing_info);
    println!("total          {}", c.total());
    println!("=== Stored ===");
    for (kind, n) in &status.stored {
        println!("{:<18} {n}", kind.as_str());
    }
    if status.pending_shard_files > 0 {
        println!(
            "{} per-process files awaiting consolidation (run `retrieve --continue`)",
            status.pending_shard_files
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "magicformula",
            "--data-dir",
            "/tmp/mf",
            "--processes",
            "4",
            "--batch-size",
            "25",
            "status",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mf"));
        assert_eq!(config.processes, 4);
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn retrieve_continue_flag() {
        let cli = Cli::parse_from(["magicformula", "retrieve", "--continue"]);
        assert!(matches!(cli.command, Commands::Retrieve { resume: true }));
    }

    #[test]
    fn zero_processes_is_rejected() {
        let cli = Cli::parse_from(["magicformula", "--processes", "0", "status"]);
        assert!(load_config(&cli).is_err());
    }
}
