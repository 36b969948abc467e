use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

/// One OHLCV time bucket. Prices are positive, `low <= {open, close} <= high`,
/// and `open_time` is strictly increasing across a validated series.
#[derive(Clone, Debug)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Load one instrument's candles from a headered CSV
/// (`open_time,close_time,open,high,low,close,volume`, epoch milliseconds).
///
/// Rows that fail numeric parsing are skipped; structural violations after
/// sorting are errors.
pub fn load_candles_from_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open csv: {}", path.display()))?;

    let mut candles = Vec::new();
    for rec in rdr.records() {
        let r = match rec {
            Ok(x) => x,
            Err(_) => continue,
        };
        let open_ms = r.get(0).and_then(|x| x.parse::<i64>().ok());
        let close_ms = r.get(1).and_then(|x| x.parse::<i64>().ok());
        let o = r.get(2).and_then(|x| x.parse::<f64>().ok());
        let h = r.get(3).and_then(|x| x.parse::<f64>().ok());
        let l = r.get(4).and_then(|x| x.parse::<f64>().ok());
        let c = r.get(5).and_then(|x| x.parse::<f64>().ok());
        let v = r.get(6).and_then(|x| x.parse::<f64>().ok());

        let (Some(open_ms), Some(close_ms), Some(open), Some(high), Some(low), Some(close), Some(volume)) =
            (open_ms, close_ms, o, h, l, c, v)
        else {
            continue;
        };
        let (Some(open_time), Some(close_time)) = (
            DateTime::from_timestamp_millis(open_ms),
            DateTime::from_timestamp_millis(close_ms),
        ) else {
            continue;
        };

        candles.push(Candle {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    if candles.is_empty() {
        bail!("no usable candles in {}", path.display());
    }

    candles.sort_by_key(|c| c.open_time);
    validate_series(&candles).with_context(|| format!("invalid series in {}", path.display()))?;
    Ok(candles)
}

/// Structural checks on a chronologically sorted series.
pub fn validate_series(candles: &[Candle]) -> Result<()> {
    if candles.is_empty() {
        bail!("candle series is empty");
    }

    for (i, c) in candles.iter().enumerate() {
        if !(c.open > 0.0 && c.high > 0.0 && c.low > 0.0 && c.close > 0.0) {
            bail!("non-positive price at index {i}");
        }
        if c.volume < 0.0 {
            bail!("negative volume at index {i}");
        }
        if c.low > c.open.min(c.close) || c.high < c.open.max(c.close) {
            bail!("open/close outside low..high at index {i}");
        }
        if c.open_time >= c.close_time {
            bail!("open_time >= close_time at index {i}");
        }
        if i > 0 && candles[i - 1].open_time >= c.open_time {
            bail!("open_time not strictly increasing at index {i}");
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn make_candle(idx: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    let start = idx * 900_000;
    Candle {
        open_time: DateTime::from_timestamp_millis(start).unwrap(),
        close_time: DateTime::from_timestamp_millis(start + 900_000).unwrap(),
        open,
        high,
        low,
        close,
        volume,
    }
}
