use crate::{
    decimal::DecimalValue,
    error::RollupError,
    instrument::{FieldDimension, InstrumentId},
    resolution::{Resolution, Window},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar with trade count. `epoch` is the start of the window the bar summarises.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Bar {
    pub epoch: DateTime<Utc>,
    pub open: DecimalValue,
    pub high: DecimalValue,
    pub low: DecimalValue,
    pub close: DecimalValue,
    pub volume: DecimalValue,
    pub trades: u64,
}

impl Bar {
    /// Construct a validated [`Bar`].
    pub fn new(
        epoch: DateTime<Utc>,
        open: DecimalValue,
        high: DecimalValue,
        low: DecimalValue,
        close: DecimalValue,
        volume: DecimalValue,
        trades: u64,
    ) -> Result<Self, RollupError> {
        let bar = Self {
            epoch,
            open,
            high,
            low,
            close,
            volume,
            trades,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Flat zero-volume bar at `price`, used when an empty window is carried forward.
    pub fn flat(epoch: DateTime<Utc>, price: DecimalValue) -> Self {
        Self {
            epoch,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: DecimalValue::ZERO,
            trades: 0,
        }
    }

    /// Check `low <= open, close <= high` and a non-negative volume.
    pub fn validate(&self) -> Result<(), RollupError> {
        let invalid = |reason: &str| {
            Err(RollupError::InvalidBar {
                epoch: self.epoch,
                reason: reason.to_string(),
            })
        };

        if self.low > self.high {
            return invalid("low above high");
        }
        if self.open < self.low || self.open > self.high {
            return invalid("open outside low..high");
        }
        if self.close < self.low || self.close > self.high {
            return invalid("close outside low..high");
        }
        if self.volume.is_sign_negative() {
            return invalid("negative volume");
        }
        Ok(())
    }

    pub fn window(&self, resolution: Resolution) -> Window {
        Window {
            resolution,
            start: self.epoch,
        }
    }
}

/// Finest-resolution bar derived directly from trades, keyed by (instrument, epoch).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct BaseBar {
    pub instrument: InstrumentId,
    #[serde(flatten)]
    pub bar: Bar,
}

impl BaseBar {
    pub fn key(&self) -> BaseBarKey {
        BaseBarKey {
            instrument: self.instrument,
            epoch: self.bar.epoch,
        }
    }
}

/// Whether a rollup was built from every expected sub-bar, each of them complete.
///
/// Counts are in sub-bars of the rollup's own rung: a 1D bar with `missing: 1` has one 4H sub-bar
/// that is absent or was itself partial. Partiality therefore carries up the ladder.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completeness {
    #[default]
    Complete,
    Partial {
        /// Sub-bars absent from the window or emitted partial themselves.
        missing: usize,
    },
}

impl Completeness {
    pub fn is_partial(&self) -> bool {
        matches!(self, Completeness::Partial { .. })
    }
}

/// Coarser-resolution bar keyed by (instrument, resolution, field dimension, epoch).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RollupBar {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub field_dimension: FieldDimension,
    pub bar: Bar,
    pub completeness: Completeness,
}

impl RollupBar {
    pub fn key(&self) -> RollupKey {
        RollupKey {
            instrument: self.instrument,
            resolution: self.resolution,
            field_dimension: self.field_dimension.clone(),
            epoch: self.bar.epoch,
        }
    }

    pub fn window(&self) -> Window {
        self.bar.window(self.resolution)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct BaseBarKey {
    pub instrument: InstrumentId,
    pub epoch: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RollupKey {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub field_dimension: FieldDimension,
    pub epoch: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::{test_utils::minute, *};

    fn value(input: &str) -> DecimalValue {
        input.parse().unwrap()
    }

    #[test]
    fn test_bar_new_validates_invariants() {
        struct TestCase {
            ohlcv: [&'static str; 5],
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: valid bar
                ohlcv: ["100", "101", "99", "100.5", "12.5"],
                expected_ok: true,
            },
            TestCase {
                // TC1: low above high
                ohlcv: ["100", "99", "101", "100", "1"],
                expected_ok: false,
            },
            TestCase {
                // TC2: open above high
                ohlcv: ["102", "101", "99", "100", "1"],
                expected_ok: false,
            },
            TestCase {
                // TC3: close below low
                ohlcv: ["100", "101", "99", "98", "1"],
                expected_ok: false,
            },
            TestCase {
                // TC4: negative volume
                ohlcv: ["100", "101", "99", "100", "-0.1"],
                expected_ok: false,
            },
            TestCase {
                // TC5: flat bar with zero volume
                ohlcv: ["100", "100", "100", "100", "0"],
                expected_ok: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let [open, high, low, close, volume] = test.ohlcv.map(value);
            let actual = Bar::new(minute(0), open, high, low, close, volume, 3);
            assert_eq!(actual.is_ok(), test.expected_ok, "TC{} failed: {actual:?}", index);
        }
    }

    #[test]
    fn test_base_bar_serde_keeps_decimal_text() {
        let base = BaseBar {
            instrument: InstrumentId(1),
            bar: super::test_utils::bar(minute(0), ["1.10", "1.20", "1.00", "1.15"], "3.000", 4),
        };

        let json = serde_json::to_value(&base).unwrap();
        assert_eq!(json["open"], "1.10");
        assert_eq!(json["volume"], "3.000");
        assert_eq!(json["trades"], 4);
        assert_eq!(json["instrument"], 1);

        let decoded: BaseBar = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, base);
        assert_eq!(decoded.key().epoch, minute(0));
    }
}
