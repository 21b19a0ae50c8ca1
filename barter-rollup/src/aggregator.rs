//! Resolution-agnostic OHLCV fold.
//!
//! The same fold is applied at every rung of the ladder: 1Min bars build 5Min bars, 5Min bars
//! build 15Min bars, and so on. Because the fold is associative, cascading through the ladder
//! yields exactly the bar a direct aggregation over the base bars would.

use crate::{
    bar::Bar,
    decimal::{DecimalValue, Precision},
    error::RollupError,
    resolution::Window,
};
use chrono::{DateTime, Utc};

/// Running OHLCV fold over sub-bars of a single window.
#[derive(Debug, Clone)]
pub struct BarFold {
    window: Window,
    last_epoch: Option<DateTime<Utc>>,
    open: DecimalValue,
    high: DecimalValue,
    low: DecimalValue,
    close: DecimalValue,
    volume: DecimalValue,
    trades: u64,
    count: usize,
}

impl BarFold {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            last_epoch: None,
            open: DecimalValue::ZERO,
            high: DecimalValue::ZERO,
            low: DecimalValue::ZERO,
            close: DecimalValue::ZERO,
            volume: DecimalValue::ZERO,
            trades: 0,
            count: 0,
        }
    }

    /// Fold the next sub-bar in. Sub-bars must arrive in ascending epoch order.
    pub fn update(&mut self, bar: &Bar, precision: &Precision) -> Result<(), RollupError> {
        if !self.window.contains(bar.epoch) {
            return Err(RollupError::OutOfWindow {
                resolution: self.window.resolution,
                window_start: self.window.start,
                epoch: bar.epoch,
            });
        }

        match self.last_epoch {
            None => {
                // Start window
                self.open = bar.open;
                self.high = bar.high;
                self.low = bar.low;
                self.close = bar.close;
                self.volume = bar.volume;
                self.trades = bar.trades;
            }
            Some(previous) if bar.epoch <= previous => {
                return Err(RollupError::UnorderedSubBars {
                    previous,
                    next: bar.epoch,
                });
            }
            Some(_) => {
                // Compute before mutating so a failed sub-bar leaves the fold untouched
                let volume = self.volume.add(bar.volume, precision)?;
                let trades = self.trades.checked_add(bar.trades).ok_or(
                    RollupError::PrecisionOverflow {
                        digits: u64::MAX.ilog10() + 2,
                        max_digits: u64::MAX.ilog10() + 1,
                    },
                )?;

                self.high = self.high.max(bar.high);
                self.low = self.low.min(bar.low);
                self.close = bar.close;
                self.volume = volume;
                self.trades = trades;
            }
        }

        self.last_epoch = Some(bar.epoch);
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Finished bar stamped with the window start, or `EmptyWindow` if nothing was folded.
    pub fn finish(&self) -> Result<Bar, RollupError> {
        if self.is_empty() {
            return Err(RollupError::EmptyWindow {
                resolution: self.window.resolution,
                window_start: self.window.start,
            });
        }

        Ok(Bar {
            epoch: self.window.start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trades: self.trades,
        })
    }
}

/// Fold ordered sub-bars into one bar for `window`.
///
/// open = first open, close = last close, high = max high, low = min low, volume and trades are
/// exact sums. Fails with [`RollupError::OutOfWindow`] if any sub-bar lies outside the window.
pub fn aggregate(
    sub_bars: &[Bar],
    window: Window,
    precision: &Precision,
) -> Result<Bar, RollupError> {
    let mut fold = BarFold::new(window);
    for bar in sub_bars {
        fold.update(bar, precision)?;
    }
    fold.finish()
}
