use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::candles::Candle;
use crate::params::HyperParams;
use crate::window::SlidingWindow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Trailing,
    VolumeSma,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Trailing => write!(f, "trailing"),
            ExitReason::VolumeSma => write!(f, "volume_sma"),
        }
    }
}

/// One position lifecycle. Created on entry with the exit fields unset,
/// finalized exactly once on exit. A trade still open when the series ends
/// keeps its exit fields `None` and contributes nothing to realized P&L.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trade {
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_index: Option<usize>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub entry_fee: Option<f64>,
    pub exit_fee: Option<f64>,
    pub net_pnl: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub duration: Option<usize>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_index.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct SimReport {
    pub trades: Vec<Trade>,
    pub realized_pnl: f64,
}

#[derive(Clone, Debug)]
struct OpenPosition {
    entry_price: f64,
    lowest_price: f64,
}

/// Deterministic single-pass replay of one candle series under one
/// hyperparameter set. Short-biased: enters on red candles during a volume
/// drought, exits when price rebounds off the post-entry low (trailing) or on
/// a volume surge above the SMA.
///
/// State is exclusively owned; one instance per (instrument x tuple) run.
pub struct SimEngine<'a> {
    candles: &'a [Candle],
    hp: HyperParams,
    cursor: usize,
    position: Option<OpenPosition>,
    volume_short: SlidingWindow,
    volume_long: SlidingWindow,
    price_sma: SlidingWindow,
    realized_pnl: f64,
    trades: Vec<Trade>,
}

impl<'a> SimEngine<'a> {
    /// Malformed input is rejected here, never mid-run.
    pub fn new(candles: &'a [Candle], hp: &HyperParams) -> Result<Self> {
        hp.validate()?;
        if candles.is_empty() {
            bail!("candle series is empty");
        }
        if !candles.windows(2).all(|w| w[0].open_time < w[1].open_time) {
            bail!("candle open_time is not strictly increasing");
        }

        Ok(Self {
            candles,
            hp: hp.clone(),
            cursor: hp.long_window,
            position: None,
            volume_short: SlidingWindow::new(hp.short_window),
            volume_long: SlidingWindow::new(hp.long_window),
            price_sma: SlidingWindow::new(hp.sma_window),
            realized_pnl: 0.0,
            trades: Vec::new(),
        })
    }

    pub fn run(mut self) -> SimReport {
        while self.cursor + 1 < self.candles.len() {
            self.advance();
            if self.position.is_none() {
                self.maybe_enter();
            } else {
                self.maybe_exit();
            }
        }

        SimReport {
            trades: self.trades,
            realized_pnl: self.realized_pnl,
        }
    }

    /// Move the cursor one candle forward and feed the windows. The post-entry
    /// low tracks the candle wick, not the close.
    fn advance(&mut self) {
        self.cursor += 1;
        let candle = &self.candles[self.cursor];

        if let Some(pos) = &mut self.position {
            pos.lowest_price = pos.lowest_price.min(candle.low);
        }

        self.volume_short.push(candle.volume);
        self.volume_long.push(candle.volume);
        self.price_sma.push(candle.close);
    }

    fn maybe_enter(&mut self) {
        let candle = &self.candles[self.cursor];

        // Entry only on red candles.
        if candle.open < candle.close {
            return;
        }
        if !self.volume_short.is_full() || !self.volume_long.is_full() {
            return;
        }

        let short_sum = self.volume_short.sum();
        let long_sum = self.volume_long.sum();
        if short_sum * self.hp.volume_scale() >= long_sum * self.hp.volume_enter_scaler {
            return;
        }

        self.position = Some(OpenPosition {
            entry_price: candle.close,
            lowest_price: candle.close,
        });
        self.trades.push(Trade {
            entry_index: self.cursor,
            entry_time: candle.close_time,
            entry_price: candle.close,
            exit_index: None,
            exit_time: None,
            exit_price: None,
            entry_fee: None,
            exit_fee: None,
            net_pnl: None,
            exit_reason: None,
            duration: None,
        });
    }

    /// Trailing stop first, unconditionally; the volume/SMA exit only once all
    /// three windows are full.
    fn maybe_exit(&mut self) {
        let Some(pos) = &self.position else { return };
        let close = self.candles[self.cursor].close;

        if close > pos.lowest_price * self.hp.trailing_stop_ratio {
            self.close_position(ExitReason::Trailing);
            return;
        }

        if !self.volume_short.is_full() || !self.volume_long.is_full() || !self.price_sma.is_full()
        {
            return;
        }

        let volume_ratio = self.volume_short.sum() * self.hp.volume_scale();
        let volume_threshold = self.volume_long.sum() * self.hp.volume_exit_scaler;
        if volume_ratio > volume_threshold && close > self.price_sma.mean() {
            self.close_position(ExitReason::VolumeSma);
        }
    }

    fn close_position(&mut self, reason: ExitReason) {
        let Some(pos) = self.position.take() else {
            return;
        };
        let candle = &self.candles[self.cursor];
        let exit_price = candle.close;

        // Short-position accounting; the exit fee is charged on the notional
        // returned, gains and losses included.
        let raw_pnl =
            (pos.entry_price - exit_price) / pos.entry_price * self.hp.position_size;
        let entry_fee = self.hp.position_size * self.hp.fee_rate;
        let exit_fee = (self.hp.position_size + raw_pnl) * self.hp.fee_rate;
        let net_pnl = raw_pnl - entry_fee - exit_fee;
        self.realized_pnl += net_pnl;

        if let Some(trade) = self.trades.last_mut() {
            trade.exit_index = Some(self.cursor);
            trade.exit_time = Some(candle.close_time);
            trade.exit_price = Some(exit_price);
            trade.entry_fee = Some(entry_fee);
            trade.exit_fee = Some(exit_fee);
            trade.net_pnl = Some(net_pnl);
            trade.exit_reason = Some(reason);
            trade.duration = Some(self.cursor - trade.entry_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::make_candle;
    use crate::params::test_params;

    /// Flat red candle: open 10.1, close 10.0, wick 9.8..10.2.
    fn flat_red(idx: i64, volume: f64) -> Candle {
        make_candle(idx, 10.1, 10.2, 9.8, 10.0, volume)
    }

    /// Flat green candle.
    fn flat_green(idx: i64, volume: f64) -> Candle {
        make_candle(idx, 10.0, 10.2, 9.8, 10.1, volume)
    }

    /// 10 candles, short=2 long=4 sma=2: volumes dry up on a red candle once
    /// the long window fills (index 8), price rebounds past the trailing
    /// threshold on the next candle.
    fn trailing_series() -> Vec<Candle> {
        let vols = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 1.0, 1.0];
        let mut candles: Vec<Candle> = (0..9).map(|i| flat_red(i, vols[i as usize])).collect();
        // Rebound: close 11.5 > lowest 10.0 * 1.1.
        candles.push(make_candle(9, 11.5, 11.6, 11.0, 11.5, 50.0));
        candles
    }

    /// Same drought entry at index 8, but candle 9 is a volume surge whose
    /// close 10.5 stays under the trailing threshold 11.0 while sitting above
    /// the 2-close SMA 10.25.
    fn surge_series() -> Vec<Candle> {
        let vols = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 1.0, 1.0];
        let mut candles: Vec<Candle> = (0..9).map(|i| flat_red(i, vols[i as usize])).collect();
        candles.push(make_candle(9, 10.6, 10.7, 10.2, 10.5, 200.0));
        candles
    }

    #[test]
    fn volume_surge_above_sma_closes_the_trade() {
        let report = SimEngine::new(&surge_series(), &test_params())
            .unwrap()
            .run();

        assert_eq!(report.trades.len(), 1);
        let t = &report.trades[0];
        assert_eq!(t.entry_index, 8);
        assert_eq!(t.exit_index, Some(9));
        assert_eq!(t.exit_reason, Some(ExitReason::VolumeSma));
        // raw (10.0 - 10.5) / 10.0 * 1000 = -50, fees 0.4 + 0.38
        assert!((t.net_pnl.unwrap() + 50.78).abs() < 1e-9);
        assert!((report.realized_pnl + 50.78).abs() < 1e-9);
    }

    #[test]
    fn volume_sma_exit_waits_for_full_sma_window() {
        // Five closes have been fed by index 9, so a 6-wide SMA window is
        // still short and the surge exit must not fire. The trailing exit
        // stays quiet too (10.5 <= 11.0), leaving the trade open.
        let mut hp = test_params();
        hp.sma_window = 6;

        let report = SimEngine::new(&surge_series(), &hp).unwrap().run();
        assert_eq!(report.trades.len(), 1);
        let t = &report.trades[0];
        assert_eq!(t.entry_index, 8);
        assert!(!t.is_closed());
        assert_eq!(t.exit_reason, None);
        assert_eq!(report.realized_pnl, 0.0);
    }

    #[test]
    fn trailing_exit_after_volume_drought() {
        let report = SimEngine::new(&trailing_series(), &test_params())
            .unwrap()
            .run();

        assert_eq!(report.trades.len(), 1);
        let t = &report.trades[0];
        assert_eq!(t.entry_index, 8);
        assert!((t.entry_price - 10.0).abs() < 1e-12);
        assert_eq!(t.exit_index, Some(9));
        assert_eq!(t.exit_reason, Some(ExitReason::Trailing));
        assert_eq!(t.duration, Some(1));
        assert!(t.is_closed());
    }

    #[test]
    fn no_entry_on_green_candles() {
        let mut candles = trailing_series();
        // Turn the drought candles green; volumes unchanged.
        candles[8] = flat_green(8, 1.0);
        candles[9] = flat_green(9, 1.0);

        let report = SimEngine::new(&candles, &test_params()).unwrap().run();
        assert!(report.trades.is_empty());
        assert_eq!(report.realized_pnl, 0.0);
    }

    #[test]
    fn no_trades_before_windows_fill() {
        // Red candles with drought-shaped volume, but the long window (4)
        // only fills at index 8 -- nothing may fire at 6 or 7.
        let report = SimEngine::new(&trailing_series(), &test_params())
            .unwrap()
            .run();
        assert!(report.trades.iter().all(|t| t.entry_index >= 8));
    }

    #[test]
    fn series_shorter_than_long_window_yields_zero_trades() {
        let candles: Vec<Candle> = (0..5).map(|i| flat_red(i, 10.0)).collect();
        let mut hp = test_params();
        hp.long_window = 10;

        let report = SimEngine::new(&candles, &hp).unwrap().run();
        assert!(report.trades.is_empty());
        assert_eq!(report.realized_pnl, 0.0);
    }

    #[test]
    fn fee_accounting_on_profitable_short() {
        // short=2 long=3 sma=2: entry at index 6 at close 100, exit at 7 at
        // close 95 via trailing off the 80 wick low.
        let mut hp = test_params();
        hp.short_window = 2;
        hp.long_window = 3;

        let mut candles: Vec<Candle> = (0..4)
            .map(|i| make_candle(i, 101.0, 102.0, 99.0, 100.0, 100.0))
            .collect();
        candles.push(make_candle(4, 101.0, 102.0, 99.0, 100.0, 100.0));
        candles.push(make_candle(5, 101.0, 102.0, 99.0, 100.0, 1.0));
        candles.push(make_candle(6, 101.0, 102.0, 99.0, 100.0, 1.0));
        candles.push(make_candle(7, 94.0, 96.0, 80.0, 95.0, 50.0));

        let report = SimEngine::new(&candles, &hp).unwrap().run();
        assert_eq!(report.trades.len(), 1);
        let t = &report.trades[0];
        assert_eq!(t.exit_reason, Some(ExitReason::Trailing));
        assert!((t.entry_fee.unwrap() - 0.4).abs() < 1e-9);
        assert!((t.exit_fee.unwrap() - 0.42).abs() < 1e-9);
        assert!((t.net_pnl.unwrap() - 49.18).abs() < 1e-9);
        assert!((report.realized_pnl - 49.18).abs() < 1e-9);
    }

    #[test]
    fn trailing_takes_priority_over_volume_sma() {
        // short=1 long=2 sma=2: at index 5 both the rebound and the
        // volume-surge-above-SMA conditions hold.
        let mut hp = test_params();
        hp.short_window = 1;
        hp.long_window = 2;

        let candles = vec![
            flat_red(0, 100.0),
            flat_red(1, 100.0),
            flat_red(2, 100.0),
            flat_red(3, 100.0),
            flat_red(4, 1.0),
            make_candle(5, 11.5, 13.0, 11.0, 12.5, 300.0),
        ];

        let report = SimEngine::new(&candles, &hp).unwrap().run();
        assert_eq!(report.trades.len(), 1);
        let t = &report.trades[0];
        assert_eq!(t.entry_index, 4);
        assert_eq!(t.exit_index, Some(5));
        assert_eq!(t.exit_reason, Some(ExitReason::Trailing));
    }

    #[test]
    fn open_trade_at_series_end_is_excluded_from_pnl() {
        let mut candles = trailing_series();
        // Second drought entry at index 12; index 13 triggers no exit.
        candles.push(flat_red(10, 100.0));
        candles.push(flat_red(11, 1.0));
        candles.push(flat_red(12, 1.0));
        candles.push(make_candle(13, 10.0, 10.1, 9.4, 9.5, 1.0));

        let report = SimEngine::new(&candles, &test_params()).unwrap().run();
        assert_eq!(report.trades.len(), 2);
        assert!(report.trades[0].is_closed());

        let open = &report.trades[1];
        assert_eq!(open.entry_index, 12);
        assert!(!open.is_closed());
        assert_eq!(open.net_pnl, None);

        let closed_sum: f64 = report
            .trades
            .iter()
            .filter_map(|t| t.net_pnl)
            .sum();
        assert!((report.realized_pnl - closed_sum).abs() < 1e-12);
    }

    #[test]
    fn replay_is_deterministic() {
        let candles = trailing_series();
        let hp = test_params();
        let a = SimEngine::new(&candles, &hp).unwrap().run();
        let b = SimEngine::new(&candles, &hp).unwrap().run();

        assert_eq!(a.realized_pnl.to_bits(), b.realized_pnl.to_bits());
        assert_eq!(
            serde_json::to_string(&a.trades).unwrap(),
            serde_json::to_string(&b.trades).unwrap()
        );
    }

    #[test]
    fn rejects_empty_series() {
        assert!(SimEngine::new(&[], &test_params()).is_err());
    }

    #[test]
    fn rejects_non_monotonic_series() {
        let candles = vec![flat_red(1, 10.0), flat_red(0, 10.0)];
        assert!(SimEngine::new(&candles, &test_params()).is_err());
    }

    #[test]
    fn rejects_invalid_hyperparams() {
        let mut hp = test_params();
        hp.sma_window = 0;
        assert!(SimEngine::new(&trailing_series(), &hp).is_err());
    }

    #[test]
    fn exit_reason_wire_labels() {
        assert_eq!(
            serde_json::to_string(&ExitReason::Trailing).unwrap(),
            "\"trailing\""
        );
        assert_eq!(
            serde_json::to_string(&ExitReason::VolumeSma).unwrap(),
            "\"volume_sma\""
        );
        // Console output uses the same labels as the JSON payload.
        assert_eq!(ExitReason::Trailing.to_string(), "trailing");
        assert_eq!(ExitReason::VolumeSma.to_string(), "volume_sma");
    }
}
