use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// One hyperparameter tuple. Immutable for the lifetime of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub short_window: usize,
    pub long_window: usize,
    pub sma_window: usize,
    pub volume_enter_scaler: f64,
    pub volume_exit_scaler: f64,
    pub trailing_stop_ratio: f64,
    pub position_size: f64,
    pub fee_rate: f64,
}

impl HyperParams {
    pub fn validate(&self) -> Result<()> {
        if self.short_window == 0 || self.long_window == 0 || self.sma_window == 0 {
            bail!("window sizes must be positive");
        }
        if self.volume_enter_scaler <= 0.0 || self.volume_exit_scaler <= 0.0 {
            bail!("volume scalers must be positive");
        }
        if self.trailing_stop_ratio <= 1.0 {
            bail!("trailing_stop_ratio must be > 1.0");
        }
        if self.position_size <= 0.0 {
            bail!("position_size must be positive");
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            bail!("fee_rate must be in [0, 1)");
        }
        Ok(())
    }

    /// Ratio used to scale the short-window volume sum up to the long
    /// horizon, so the two sums compare like-for-like.
    pub fn volume_scale(&self) -> f64 {
        self.long_window as f64 / self.short_window as f64
    }
}

/// Six value-list axes swept as a full Cartesian product. `position_size` and
/// `fee_rate` are fixed across the sweep and supplied separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepGrid {
    #[serde(default = "default_short_windows")]
    pub short_windows: Vec<usize>,
    #[serde(default = "default_long_windows")]
    pub long_windows: Vec<usize>,
    #[serde(default = "default_volume_enter_scalers")]
    pub volume_enter_scalers: Vec<f64>,
    #[serde(default = "default_volume_exit_scalers")]
    pub volume_exit_scalers: Vec<f64>,
    #[serde(default = "default_trailing_stop_ratios")]
    pub trailing_stop_ratios: Vec<f64>,
    #[serde(default = "default_sma_windows")]
    pub sma_windows: Vec<usize>,
}

fn default_short_windows() -> Vec<usize> {
    vec![7]
}
fn default_long_windows() -> Vec<usize> {
    vec![34, 38]
}
fn default_volume_enter_scalers() -> Vec<f64> {
    vec![0.6, 0.7]
}
fn default_volume_exit_scalers() -> Vec<f64> {
    vec![1.1]
}
fn default_trailing_stop_ratios() -> Vec<f64> {
    vec![1.05, 1.1]
}
fn default_sma_windows() -> Vec<usize> {
    vec![3, 4, 5, 6]
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            short_windows: default_short_windows(),
            long_windows: default_long_windows(),
            volume_enter_scalers: default_volume_enter_scalers(),
            volume_exit_scalers: default_volume_exit_scalers(),
            trailing_stop_ratios: default_trailing_stop_ratios(),
            sma_windows: default_sma_windows(),
        }
    }
}

impl SweepGrid {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep grid: {}", path.display()))?;
        let grid: SweepGrid = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse sweep grid: {}", path.display()))?;
        grid.validate()?;
        Ok(grid)
    }

    /// Empty axes are configuration errors and are rejected before any
    /// simulation starts. Per-combination value checks happen at engine
    /// construction so one bad tuple cannot take down the sweep.
    pub fn validate(&self) -> Result<()> {
        if self.short_windows.is_empty()
            || self.long_windows.is_empty()
            || self.volume_enter_scalers.is_empty()
            || self.volume_exit_scalers.is_empty()
            || self.trailing_stop_ratios.is_empty()
            || self.sma_windows.is_empty()
        {
            bail!("every sweep axis needs at least one value");
        }
        Ok(())
    }

    pub fn combination_count(&self) -> usize {
        self.short_windows.len()
            * self.long_windows.len()
            * self.volume_enter_scalers.len()
            * self.volume_exit_scalers.len()
            * self.trailing_stop_ratios.len()
            * self.sma_windows.len()
    }

    /// Cartesian product in fixed nested-axis order. The order is part of the
    /// contract: ranking ties are broken by first-generated tuple.
    pub fn combinations(&self, position_size: f64, fee_rate: f64) -> Vec<HyperParams> {
        let mut combos = Vec::with_capacity(self.combination_count());
        for &short_window in &self.short_windows {
            for &long_window in &self.long_windows {
                for &volume_enter_scaler in &self.volume_enter_scalers {
                    for &volume_exit_scaler in &self.volume_exit_scalers {
                        for &trailing_stop_ratio in &self.trailing_stop_ratios {
                            for &sma_window in &self.sma_windows {
                                combos.push(HyperParams {
                                    short_window,
                                    long_window,
                                    sma_window,
                                    volume_enter_scaler,
                                    volume_exit_scaler,
                                    trailing_stop_ratio,
                                    position_size,
                                    fee_rate,
                                });
                            }
                        }
                    }
                }
            }
        }
        combos
    }
}

#[cfg(test)]
pub(crate) fn test_params() -> HyperParams {
    HyperParams {
        short_window: 2,
        long_window: 4,
        sma_window: 2,
        volume_enter_scaler: 0.7,
        volume_exit_scaler: 1.1,
        trailing_stop_ratio: 1.1,
        position_size: 1000.0,
        fee_rate: 0.0004,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_params_pass() {
        assert!(test_params().validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let mut hp = test_params();
        hp.long_window = 0;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn rejects_trailing_ratio_at_one() {
        let mut hp = test_params();
        hp.trailing_stop_ratio = 1.0;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn rejects_fee_rate_of_one() {
        let mut hp = test_params();
        hp.fee_rate = 1.0;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn rejects_negative_fee_rate() {
        let mut hp = test_params();
        hp.fee_rate = -0.0001;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn default_grid_product_size() {
        let grid = SweepGrid::default();
        // 1 * 2 * 2 * 1 * 2 * 4
        assert_eq!(grid.combination_count(), 32);
        assert_eq!(grid.combinations(1000.0, 0.0004).len(), 32);
    }

    #[test]
    fn combinations_carry_fixed_params() {
        let grid = SweepGrid::default();
        for hp in grid.combinations(500.0, 0.001) {
            assert!((hp.position_size - 500.0).abs() < 1e-12);
            assert!((hp.fee_rate - 0.001).abs() < 1e-12);
        }
    }

    #[test]
    fn combination_order_is_deterministic() {
        let grid = SweepGrid {
            short_windows: vec![2, 3],
            long_windows: vec![4],
            volume_enter_scalers: vec![0.7],
            volume_exit_scalers: vec![1.1],
            trailing_stop_ratios: vec![1.1],
            sma_windows: vec![2, 5],
        };
        let combos = grid.combinations(1000.0, 0.0004);
        assert_eq!(combos.len(), 4);
        assert_eq!(
            combos
                .iter()
                .map(|c| (c.short_window, c.sma_window))
                .collect::<Vec<_>>(),
            vec![(2, 2), (2, 5), (3, 2), (3, 5)]
        );
    }

    #[test]
    fn empty_axis_is_rejected() {
        let grid = SweepGrid {
            sma_windows: vec![],
            ..SweepGrid::default()
        };
        assert!(grid.validate().is_err());
    }

    #[test]
    fn grid_json_with_partial_axes_uses_defaults() {
        let grid: SweepGrid =
            serde_json::from_str(r#"{"short_windows": [5, 9], "sma_windows": [4]}"#).unwrap();
        assert_eq!(grid.short_windows, vec![5, 9]);
        assert_eq!(grid.sma_windows, vec![4]);
        assert_eq!(grid.long_windows, vec![34, 38]);
        assert_eq!(grid.combination_count(), 2 * 2 * 2 * 1 * 2 * 1);
    }
}
