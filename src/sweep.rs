//! Parallel hyperparameter sweep.
//!
//! Generates the Cartesian product of the grid axes and evaluates each tuple
//! against every instrument on a bounded rayon pool. One work unit is one
//! tuple; the instrument loop inside a unit stays sequential so a unit's
//! footprint stays bounded. Results are collected in generation order and
//! stable-sorted by combined P&L, so the ranking is invariant to completion
//! order and ties keep the first-generated tuple.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::candles::Candle;
use crate::engine::{SimEngine, Trade};
use crate::params::{HyperParams, SweepGrid};

/// A trade plus the instrument that produced it.
#[derive(Clone, Debug, Serialize)]
pub struct TaggedTrade {
    pub instrument: String,
    #[serde(flatten)]
    pub trade: Trade,
}

#[derive(Clone, Debug, Serialize)]
pub struct InstrumentOutcome {
    pub instrument: String,
    pub realized_pnl: f64,
    pub trade_count: usize,
}

/// A per-instrument engine failure, attributed but never fatal to the sweep.
#[derive(Clone, Debug, Serialize)]
pub struct InstrumentFailure {
    pub instrument: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepResult {
    pub params: HyperParams,
    pub per_instrument: Vec<InstrumentOutcome>,
    pub failures: Vec<InstrumentFailure>,
    pub total_pnl: f64,
    pub total_trades: usize,
    #[serde(skip)]
    pub trades: Vec<TaggedTrade>,
}

/// Ranked sweep output, best combined P&L first.
#[derive(Clone, Debug)]
pub struct SweepOutcome {
    pub results: Vec<SweepResult>,
}

impl SweepOutcome {
    pub fn best(&self) -> Option<&SweepResult> {
        self.results.first()
    }

    /// Full tagged trade list for an exact parameter tuple.
    pub fn trades_for(&self, params: &HyperParams) -> Option<&[TaggedTrade]> {
        self.results
            .iter()
            .find(|r| &r.params == params)
            .map(|r| r.trades.as_slice())
    }
}

/// One work unit: run the engine for every instrument under one tuple.
/// Engine state is created and dropped inside this call; the candle series
/// are only ever read.
fn evaluate_combination(hp: &HyperParams, instruments: &[(String, Vec<Candle>)]) -> SweepResult {
    let mut per_instrument = Vec::with_capacity(instruments.len());
    let mut failures = Vec::new();
    let mut trades = Vec::new();
    let mut total_pnl = 0.0;
    let mut total_trades = 0;

    for (instrument, series) in instruments {
        match SimEngine::new(series, hp) {
            Ok(engine) => {
                let report = engine.run();
                total_pnl += report.realized_pnl;
                total_trades += report.trades.len();
                per_instrument.push(InstrumentOutcome {
                    instrument: instrument.clone(),
                    realized_pnl: report.realized_pnl,
                    trade_count: report.trades.len(),
                });
                trades.extend(report.trades.into_iter().map(|trade| TaggedTrade {
                    instrument: instrument.clone(),
                    trade,
                }));
            }
            Err(e) => failures.push(InstrumentFailure {
                instrument: instrument.clone(),
                error: format!("{e:#}"),
            }),
        }
    }

    SweepResult {
        params: hp.clone(),
        per_instrument,
        failures,
        total_pnl,
        total_trades,
        trades,
    }
}

pub fn run_sweep(
    grid: &SweepGrid,
    instruments: &[(String, Vec<Candle>)],
    position_size: f64,
    fee_rate: f64,
    workers: usize,
) -> Result<SweepOutcome> {
    grid.validate()?;
    let combos = grid.combinations(position_size, fee_rate);
    let total = combos.len();
    let completed = AtomicUsize::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("failed to build worker pool")?;

    let mut results: Vec<SweepResult> = pool.install(|| {
        combos
            .par_iter()
            .map(|hp| {
                let result = evaluate_combination(hp, instruments);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                println!("{done}/{total} parameter sets tested");
                result
            })
            .collect()
    });

    results.sort_by(|a, b| {
        b.total_pnl
            .partial_cmp(&a.total_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(SweepOutcome { results })
}
