//! Exact base-10 fixed-point values used for every price, volume, amount and premium field.
//!
//! Nothing in here ever passes through `f32`/`f64`. Addition and subtraction are carried out on
//! the raw mantissas at the wider of the two scales, so a result is either exact or rejected with
//! [`RollupError::PrecisionOverflow`].

use crate::error::RollupError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{cmp::Ordering, fmt, str::FromStr};

/// Largest number of significant digits `rust_decimal` can represent exactly.
pub const MAX_SIGNIFICANT_DIGITS: u32 = 28;

/// Default scale used by [`DecimalValue::div_at`] callers when nothing else is configured.
pub const DEFAULT_DIVISION_SCALE: u32 = 12;

/// Precision limits applied to [`DecimalValue`] arithmetic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct Precision {
    /// Maximum significant digits any arithmetic result may carry.
    pub max_digits: u32,
    /// Number of fractional digits kept by division (rounded half-even).
    pub division_scale: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            max_digits: MAX_SIGNIFICANT_DIGITS,
            division_scale: DEFAULT_DIVISION_SCALE,
        }
    }
}

impl Precision {
    pub fn new(max_digits: u32, division_scale: u32) -> Self {
        Self {
            max_digits: max_digits.clamp(1, MAX_SIGNIFICANT_DIGITS),
            division_scale: division_scale.min(MAX_SIGNIFICANT_DIGITS),
        }
    }

    fn check(&self, value: Decimal) -> Result<DecimalValue, RollupError> {
        let digits = significant_digits(value);
        if digits > self.max_digits {
            Err(RollupError::PrecisionOverflow {
                digits,
                max_digits: self.max_digits,
            })
        } else {
            Ok(DecimalValue(value))
        }
    }
}

/// Exact decimal value. Text form round-trips exactly, including trailing zeros.
#[derive(Debug, Copy, Clone, Default)]
pub struct DecimalValue(Decimal);

impl DecimalValue {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_sign_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn add(self, rhs: Self, precision: &Precision) -> Result<Self, RollupError> {
        exact_combine(self.0, rhs.0, false, precision)
    }

    pub fn sub(self, rhs: Self, precision: &Precision) -> Result<Self, RollupError> {
        exact_combine(self.0, rhs.0, true, precision)
    }

    /// Divide, keeping `precision.division_scale` fractional digits (half-even).
    pub fn div_at(self, rhs: Self, precision: &Precision) -> Result<Self, RollupError> {
        if rhs.0.is_zero() {
            return Err(RollupError::DivisionByZero);
        }

        let quotient = self
            .0
            .checked_div(rhs.0)
            .ok_or(RollupError::PrecisionOverflow {
                digits: MAX_SIGNIFICANT_DIGITS + 1,
                max_digits: precision.max_digits,
            })?
            .round_dp_with_strategy(precision.division_scale, RoundingStrategy::MidpointNearestEven)
            .normalize();

        precision.check(quotient)
    }

    pub fn min(self, rhs: Self) -> Self {
        if rhs < self { rhs } else { self }
    }

    pub fn max(self, rhs: Self) -> Self {
        if rhs > self { rhs } else { self }
    }

    /// Exact sum of every value yielded. The empty sum is zero.
    pub fn sum<I>(values: I, precision: &Precision) -> Result<Self, RollupError>
    where
        I: IntoIterator<Item = Self>,
    {
        values
            .into_iter()
            .try_fold(Self::ZERO, |total, next| total.add(next, precision))
    }
}

/// Adds (or subtracts) two decimals on i128 mantissas aligned to the wider scale.
fn exact_combine(
    lhs: Decimal,
    rhs: Decimal,
    negate_rhs: bool,
    precision: &Precision,
) -> Result<DecimalValue, RollupError> {
    let overflow = || RollupError::PrecisionOverflow {
        digits: MAX_SIGNIFICANT_DIGITS + 1,
        max_digits: precision.max_digits,
    };

    let scale = lhs.scale().max(rhs.scale());
    let lhs_mantissa = rescale_mantissa(lhs, scale).ok_or_else(overflow)?;
    let mut rhs_mantissa = rescale_mantissa(rhs, scale).ok_or_else(overflow)?;
    if negate_rhs {
        rhs_mantissa = rhs_mantissa.checked_neg().ok_or_else(overflow)?;
    }

    let (mut mantissa, mut scale) = (
        lhs_mantissa.checked_add(rhs_mantissa).ok_or_else(overflow)?,
        scale,
    );

    // Trailing fractional zeros are not significant
    while scale > 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        scale -= 1;
    }

    let digits = mantissa_digits(mantissa);
    if digits > precision.max_digits {
        return Err(RollupError::PrecisionOverflow {
            digits,
            max_digits: precision.max_digits,
        });
    }

    let value = Decimal::try_from_i128_with_scale(mantissa, scale).map_err(|_| overflow())?;
    Ok(DecimalValue(value))
}

fn rescale_mantissa(value: Decimal, scale: u32) -> Option<i128> {
    let factor = 10_i128.checked_pow(scale - value.scale())?;
    value.mantissa().checked_mul(factor)
}

fn mantissa_digits(mantissa: i128) -> u32 {
    mantissa
        .unsigned_abs()
        .checked_ilog10()
        .map_or(1, |log| log + 1)
}

fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let mut parts = unsigned.splitn(2, '.');
    let integer = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();

    !(integer.is_empty() && fraction.is_empty())
        && integer.bytes().all(|byte| byte.is_ascii_digit())
        && fraction.bytes().all(|byte| byte.is_ascii_digit())
}

fn significant_digits(value: Decimal) -> u32 {
    mantissa_digits(value.normalize().mantissa())
}

impl PartialEq for DecimalValue {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for DecimalValue {}

impl std::hash::Hash for DecimalValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for DecimalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecimalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<Decimal> for DecimalValue {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<u64> for DecimalValue {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl FromStr for DecimalValue {
    type Err = RollupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match Decimal::from_str_exact(trimmed) {
            Ok(value) => Ok(Self(value)),
            // Well-formed text that does not fit is an overflow, anything else is malformed
            Err(_) if is_plain_decimal(trimmed) => Err(RollupError::PrecisionOverflow {
                digits: trimmed.chars().filter(char::is_ascii_digit).count() as u32,
                max_digits: MAX_SIGNIFICANT_DIGITS,
            }),
            Err(error) => Err(RollupError::Parse {
                input: s.to_string(),
                reason: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for DecimalValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DecimalValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
