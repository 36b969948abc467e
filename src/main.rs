mod candles;
mod engine;
mod params;
mod report;
mod sweep;
mod window;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::params::SweepGrid;

/// Grid-search optimizer for a short-biased volume-drought strategy.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding one <SYMBOL>.csv per instrument
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Comma-separated instrument symbols
    #[arg(long, default_value = "VINE,TRUMP,kPEPE", value_delimiter = ',')]
    symbols: Vec<String>,

    /// JSON file overriding the default sweep grid axes
    #[arg(long)]
    grid: Option<PathBuf>,

    /// Worker threads for the sweep
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Notional size per trade
    #[arg(long, default_value_t = 1000.0)]
    position_size: f64,

    /// Taker fee rate applied on entry and exit
    #[arg(long, default_value_t = 0.0004)]
    fee_rate: f64,

    /// How many ranked configurations to print and export
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Output path for the selected-configuration JSON payload
    #[arg(long, default_value = "sweep_results.json")]
    out: PathBuf,

    /// Output path for the full results table
    #[arg(long, default_value = "sweep_results.csv")]
    csv_out: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }
    if args.symbols.is_empty() {
        bail!("--symbols must name at least one instrument");
    }

    let grid = match &args.grid {
        Some(path) => SweepGrid::load(path)?,
        None => SweepGrid::default(),
    };

    let mut instruments = Vec::new();
    for symbol in &args.symbols {
        let path = args.data_dir.join(format!("{symbol}.csv"));
        match candles::load_candles_from_csv(&path) {
            Ok(series) => {
                println!(
                    "loaded {symbol}: {} candles from {}",
                    series.len(),
                    path.display()
                );
                instruments.push((symbol.clone(), series));
            }
            Err(e) => println!("WARNING: skipping {symbol}: {e:#}"),
        }
    }
    if instruments.is_empty() {
        bail!("no instruments loaded from {}", args.data_dir.display());
    }

    println!(
        "sweeping {} combinations across {} instruments on {} workers",
        grid.combination_count(),
        instruments.len(),
        args.workers
    );

    let outcome = sweep::run_sweep(
        &grid,
        &instruments,
        args.position_size,
        args.fee_rate,
        args.workers,
    )?;

    report::print_summary(&outcome, args.top);

    report::write_results_csv(&args.csv_out, &outcome.results, &args.symbols)?;
    println!("\nSaved results table: {}", args.csv_out.display());

    let payload = report::build_payload(
        &grid,
        &outcome,
        &args.symbols,
        args.position_size,
        args.fee_rate,
        args.top,
    );
    std::fs::write(&args.out, serde_json::to_string_pretty(&payload)?)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!("Saved selected configuration: {}", args.out.display());

    Ok(())
}
