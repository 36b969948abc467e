use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Value, json};

use crate::engine::ExitReason;
use crate::params::SweepGrid;
use crate::sweep::{SweepOutcome, SweepResult, TaggedTrade};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TradeCounts {
    pub profitable: usize,
    pub losing: usize,
    pub trailing_exits: usize,
    pub volume_sma_exits: usize,
    pub open: usize,
}

pub fn count_trades(trades: &[TaggedTrade]) -> TradeCounts {
    let mut counts = TradeCounts::default();
    for t in trades {
        match t.trade.net_pnl {
            Some(pnl) if pnl > 0.0 => counts.profitable += 1,
            Some(pnl) if pnl < 0.0 => counts.losing += 1,
            Some(_) => {}
            None => counts.open += 1,
        }
        match t.trade.exit_reason {
            Some(ExitReason::Trailing) => counts.trailing_exits += 1,
            Some(ExitReason::VolumeSma) => counts.volume_sma_exits += 1,
            None => {}
        }
    }
    counts
}

/// One row per tuple: the six axes, combined totals, per-instrument breakdown
/// in a fixed column order, and any failed instruments.
pub fn write_results_csv(
    path: &Path,
    results: &[SweepResult],
    instruments: &[String],
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header: Vec<String> = [
        "short_window",
        "long_window",
        "volume_enter_scaler",
        "volume_exit_scaler",
        "trailing_stop_ratio",
        "sma_window",
        "total_pnl",
        "total_trades",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for name in instruments {
        header.push(format!("{name}_pnl"));
        header.push(format!("{name}_trades"));
    }
    header.push("failed_instruments".to_string());
    wtr.write_record(&header)?;

    for r in results {
        let mut row = vec![
            r.params.short_window.to_string(),
            r.params.long_window.to_string(),
            r.params.volume_enter_scaler.to_string(),
            r.params.volume_exit_scaler.to_string(),
            r.params.trailing_stop_ratio.to_string(),
            r.params.sma_window.to_string(),
            format!("{:.6}", r.total_pnl),
            r.total_trades.to_string(),
        ];
        for name in instruments {
            match r.per_instrument.iter().find(|o| &o.instrument == name) {
                Some(o) => {
                    row.push(format!("{:.6}", o.realized_pnl));
                    row.push(o.trade_count.to_string());
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                }
            }
        }
        row.push(
            r.failures
                .iter()
                .map(|f| f.instrument.as_str())
                .collect::<Vec<_>>()
                .join(";"),
        );
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn build_payload(
    grid: &SweepGrid,
    outcome: &SweepOutcome,
    instruments: &[String],
    position_size: f64,
    fee_rate: f64,
    top: usize,
) -> Value {
    json!({
        "objective": "maximize combined realized pnl across instruments",
        "generated_at_utc": Utc::now().to_rfc3339(),
        "instruments": instruments,
        "position_size": position_size,
        "fee_rate": fee_rate,
        "grid": grid,
        "combinations": outcome.results.len(),
        "selected": outcome.best(),
        "top": outcome.results.iter().take(top).collect::<Vec<_>>(),
    })
}

pub fn print_summary(outcome: &SweepOutcome, top: usize) {
    let Some(best) = outcome.best() else {
        println!("no parameter combinations evaluated");
        return;
    };

    println!("\nBest combined configuration:");
    println!("  short_window         : {}", best.params.short_window);
    println!("  long_window          : {}", best.params.long_window);
    println!("  volume_enter_scaler  : {}", best.params.volume_enter_scaler);
    println!("  volume_exit_scaler   : {}", best.params.volume_exit_scaler);
    println!("  trailing_stop_ratio  : {}", best.params.trailing_stop_ratio);
    println!("  sma_window           : {}", best.params.sma_window);
    println!("  total_pnl            : {:.2}", best.total_pnl);
    println!("  total_trades         : {}", best.total_trades);

    println!("\nBreakdown by instrument:");
    for o in &best.per_instrument {
        println!(
            "  {} pnl={:.2} trades={}",
            o.instrument, o.realized_pnl, o.trade_count
        );
    }
    for f in &best.failures {
        println!("  {} FAILED: {}", f.instrument, f.error);
    }

    println!("\nTop {} configurations:", top.min(outcome.results.len()));
    for (i, r) in outcome.results.iter().take(top).enumerate() {
        println!(
            "  {}. short={} long={} enter={} exit={} trailing={} sma={} pnl={:.2} trades={}",
            i + 1,
            r.params.short_window,
            r.params.long_window,
            r.params.volume_enter_scaler,
            r.params.volume_exit_scaler,
            r.params.trailing_stop_ratio,
            r.params.sma_window,
            r.total_pnl,
            r.total_trades
        );
    }

    print_trade_extremes(&best.trades);

    let counts = count_trades(&best.trades);
    println!("\n=== Trade Summary (best configuration) ===");
    println!("Total Trades        : {}", best.total_trades);
    println!("Profitable Trades   : {}", counts.profitable);
    println!("Losing Trades       : {}", counts.losing);
    println!("Volume-Based Exits  : {}", counts.volume_sma_exits);
    println!("Trailing Stop Exits : {}", counts.trailing_exits);
    println!("Still Open          : {}", counts.open);
}

fn print_trade_extremes(trades: &[TaggedTrade]) {
    let mut closed: Vec<&TaggedTrade> = trades.iter().filter(|t| t.trade.is_closed()).collect();
    if closed.is_empty() {
        return;
    }
    closed.sort_by(|a, b| {
        b.trade
            .net_pnl
            .partial_cmp(&a.trade.net_pnl)
            .unwrap_or(Ordering::Equal)
    });

    println!("\nMost profitable trades (best configuration):");
    for t in closed.iter().take(3) {
        print_trade_line(t);
    }
    println!("\nMost unprofitable trades (best configuration):");
    for t in closed.iter().rev().take(3) {
        print_trade_line(t);
    }
}

fn print_trade_line(t: &TaggedTrade) {
    println!(
        "  {} entry {} @ {} -> exit {} @ {} | net_pnl={:.2} reason={:?}",
        t.instrument,
        t.trade.entry_time,
        t.trade.entry_price,
        t.trade
            .exit_time
            .map(|x| x.to_string())
            .unwrap_or_else(|| "-".to_string()),
        t.trade
            .exit_price
            .map(|x| x.to_string())
            .unwrap_or_else(|| "-".to_string()),
        t.trade.net_pnl.unwrap_or(0.0),
        t.trade
            .exit_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
}
