use crate::{
    bar::Bar,
    decimal::{DecimalValue, Precision},
    error::RollupError,
    instrument::{Instrument, InstrumentId},
    resolution::Resolution,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name suffix carried by perpetual futures instruments.
pub const PERPETUAL_SUFFIX: &str = ".P";

/// Spot instrument and the futures instrument quoted against it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct PremiumPair {
    pub spot: InstrumentId,
    pub futures: InstrumentId,
}

impl PremiumPair {
    pub fn new(spot: InstrumentId, futures: InstrumentId) -> Self {
        Self { spot, futures }
    }

    /// Check the futures instrument is the perpetual listing of the spot instrument.
    ///
    /// eg/ spot `BINANCE:BTCUSDT` pairs with futures `BINANCE:BTCUSDT.P`.
    pub fn validate(&self, spot: &Instrument, futures: &Instrument) -> Result<(), RollupError> {
        if spot.id != self.spot || futures.id != self.futures {
            return Err(RollupError::InvalidPair(format!(
                "instruments {}/{} do not match pair {}/{}",
                spot.id, futures.id, self.spot, self.futures
            )));
        }
        if !futures.name.starts_with(spot.name.as_str()) {
            return Err(RollupError::InvalidPair(format!(
                "{} is not listed against {}",
                futures.name, spot.name
            )));
        }
        if !futures.name.ends_with(PERPETUAL_SUFFIX) {
            return Err(RollupError::InvalidPair(format!(
                "{} does not end with '{PERPETUAL_SUFFIX}'",
                futures.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct PremiumKey {
    pub spot: InstrumentId,
    pub futures: InstrumentId,
    pub resolution: Resolution,
    pub epoch: DateTime<Utc>,
}

/// Premium of the futures close over the spot close for one window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct PremiumIndex {
    pub spot: InstrumentId,
    pub futures: InstrumentId,
    pub resolution: Resolution,
    pub epoch: DateTime<Utc>,
    pub premium_index: DecimalValue,
}

impl PremiumIndex {
    pub fn key(&self) -> PremiumKey {
        PremiumKey {
            spot: self.spot,
            futures: self.futures,
            resolution: self.resolution,
            epoch: self.epoch,
        }
    }
}

/// `(futures_close - spot_close) / spot_close`, divided exactly at `precision.division_scale`.
pub fn compute_premium(
    spot: &Bar,
    futures: &Bar,
    precision: &Precision,
) -> Result<DecimalValue, RollupError> {
    if spot.epoch != futures.epoch {
        return Err(RollupError::WindowMismatch {
            spot: spot.epoch,
            futures: futures.epoch,
        });
    }
    if spot.close.is_zero() {
        return Err(RollupError::DivisionByZero);
    }

    futures
        .close
        .sub(spot.close, precision)?
        .div_at(spot.close, precision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bar::test_utils::{bar, minute},
        instrument::ExchangeId,
    };
    use smol_str::SmolStr;

    fn close(epoch: DateTime<Utc>, close: &str) -> Bar {
        bar(epoch, [close, close, close, close], "1", 1)
    }

    #[test]
    fn test_compute_premium() {
        struct TestCase {
            spot: Bar,
            futures: Bar,
            expected: Result<&'static str, RollupError>,
        }

        let tests = vec![
            TestCase {
                // TC0: 100 -> 101 is exactly 0.01
                spot: close(minute(0), "100"),
                futures: close(minute(0), "101"),
                expected: Ok("0.01"),
            },
            TestCase {
                // TC1: futures at discount
                spot: close(minute(0), "200"),
                futures: close(minute(0), "199.5"),
                expected: Ok("-0.0025"),
            },
            TestCase {
                // TC2: non-terminating quotient rounded at division scale
                spot: close(minute(0), "3"),
                futures: close(minute(0), "4"),
                expected: Ok("0.333333333333"),
            },
            TestCase {
                // TC3: windows differ
                spot: close(minute(0), "100"),
                futures: close(minute(1), "101"),
                expected: Err(RollupError::WindowMismatch {
                    spot: minute(0),
                    futures: minute(1),
                }),
            },
            TestCase {
                // TC4: zero spot close
                spot: close(minute(0), "0"),
                futures: close(minute(0), "101"),
                expected: Err(RollupError::DivisionByZero),
            },
        ];

        let precision = Precision::default();
        for (index, test) in tests.into_iter().enumerate() {
            let actual = compute_premium(&test.spot, &test.futures, &precision);
            let expected = test.expected.map(|text| text.parse::<DecimalValue>().unwrap());
            assert_eq!(actual, expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_premium_is_exact_not_float_approximation() {
        let premium = compute_premium(
            &close(minute(0), "100"),
            &close(minute(0), "101"),
            &Precision::default(),
        )
        .unwrap();

        assert_eq!(premium.to_string(), "0.01");
    }

    #[test]
    fn test_premium_pair_validate() {
        let instrument = |id, name: &str| Instrument {
            id: InstrumentId(id),
            name: SmolStr::new(name),
            exchange: ExchangeId(1),
        };
        let pair = PremiumPair::new(InstrumentId(1), InstrumentId(2));

        assert_eq!(
            pair.validate(&instrument(1, "BINANCE:BTCUSDT"), &instrument(2, "BINANCE:BTCUSDT.P")),
            Ok(())
        );
        assert!(
            pair.validate(&instrument(1, "BINANCE:BTCUSDT"), &instrument(2, "BINANCE:ETHUSDT.P"))
                .is_err()
        );
        assert!(
            pair.validate(&instrument(1, "BINANCE:BTCUSDT"), &instrument(2, "BINANCE:BTCUSDT"))
                .is_err()
        );
        assert!(
            pair.validate(&instrument(3, "BINANCE:BTCUSDT"), &instrument(2, "BINANCE:BTCUSDT.P"))
                .is_err()
        );
    }
}
