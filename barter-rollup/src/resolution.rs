//! The fixed resolution ladder and epoch-aligned window arithmetic.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Supported bar resolutions, strictly ordered finest to coarsest.
///
/// Each rung is an exact multiple of the one below it, so every coarser window is tiled by
/// whole finer windows.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub enum Resolution {
    #[serde(rename = "1Min")]
    OneMin,
    #[serde(rename = "5Min")]
    FiveMin,
    #[serde(rename = "15Min")]
    FifteenMin,
    #[serde(rename = "30Min")]
    ThirtyMin,
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "4H")]
    FourHour,
    #[serde(rename = "1D")]
    OneDay,
}

impl Resolution {
    /// Every rung of the ladder, finest first.
    pub const LADDER: [Resolution; 7] = [
        Resolution::OneMin,
        Resolution::FiveMin,
        Resolution::FifteenMin,
        Resolution::ThirtyMin,
        Resolution::OneHour,
        Resolution::FourHour,
        Resolution::OneDay,
    ];

    /// Finest supported resolution, used for base bars.
    pub const BASE: Resolution = Resolution::OneMin;

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::OneMin => "1Min",
            Resolution::FiveMin => "5Min",
            Resolution::FifteenMin => "15Min",
            Resolution::ThirtyMin => "30Min",
            Resolution::OneHour => "1H",
            Resolution::FourHour => "4H",
            Resolution::OneDay => "1D",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Resolution::OneMin => 60,
            Resolution::FiveMin => 5 * 60,
            Resolution::FifteenMin => 15 * 60,
            Resolution::ThirtyMin => 30 * 60,
            Resolution::OneHour => 60 * 60,
            Resolution::FourHour => 4 * 60 * 60,
            Resolution::OneDay => 24 * 60 * 60,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    fn position(&self) -> usize {
        *self as usize
    }

    /// Next finer rung, `None` for the base resolution.
    pub fn finer(&self) -> Option<Resolution> {
        self.position()
            .checked_sub(1)
            .map(|position| Self::LADDER[position])
    }

    /// Next coarser rung, `None` for the top of the ladder.
    pub fn coarser(&self) -> Option<Resolution> {
        Self::LADDER.get(self.position() + 1).copied()
    }

    /// Number of immediately-finer bars that tile one window of this resolution.
    ///
    /// The base resolution is tiled by itself.
    pub fn sub_bar_count(&self) -> usize {
        match self.finer() {
            Some(finer) => (self.seconds() / finer.seconds()) as usize,
            None => 1,
        }
    }

    /// Start of the epoch-aligned window containing `timestamp`.
    ///
    /// `windowStart = timestamp - (timestamp mod resolution)`, using euclidean remainder so
    /// timestamps before 1970 still align downwards.
    pub fn window_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let millis = timestamp.timestamp_millis();
        let width = self.seconds() * 1_000;
        let aligned = millis - millis.rem_euclid(width);
        DateTime::from_timestamp_millis(aligned).unwrap_or(timestamp)
    }

    pub fn window(&self, timestamp: DateTime<Utc>) -> Window {
        Window {
            resolution: *self,
            start: self.window_start(timestamp),
        }
    }

    pub fn is_aligned(&self, timestamp: DateTime<Utc>) -> bool {
        self.window_start(timestamp) == timestamp
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::LADDER
            .into_iter()
            .find(|resolution| resolution.as_str() == s)
            .ok_or_else(|| format!("invalid Resolution string: {s}"))
    }
}

/// Half-open interval `[start, start + resolution)` that a single bar summarises.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Window {
    pub resolution: Resolution,
    pub start: DateTime<Utc>,
}

impl Window {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.resolution.duration()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end()
    }

    /// Window of the next coarser rung that wholly contains this one.
    pub fn parent(&self) -> Option<Window> {
        self.resolution
            .coarser()
            .map(|coarser| coarser.window(self.start))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resolution, self.start.format("%Y-%m-%dT%H:%M:%SZ"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_ladder_ratios() {
        let ratios: Vec<_> = Resolution::LADDER
            .iter()
            .map(Resolution::sub_bar_count)
            .collect();
        assert_eq!(ratios, vec![1, 5, 3, 2, 2, 4, 6]);

        assert_eq!(Resolution::OneMin.finer(), None);
        assert_eq!(Resolution::OneDay.coarser(), None);
        assert_eq!(Resolution::FifteenMin.finer(), Some(Resolution::FiveMin));
        assert_eq!(Resolution::FourHour.coarser(), Some(Resolution::OneDay));
    }

    #[test]
    fn test_tokens_round_trip() {
        for resolution in Resolution::LADDER {
            assert_eq!(resolution.as_str().parse::<Resolution>(), Ok(resolution));
            let json = serde_json::to_string(&resolution).unwrap();
            assert_eq!(json, format!("\"{}\"", resolution.as_str()));
        }
        assert!("2H".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_window_start_contains_timestamp_and_is_fixed_point() {
        let timestamps = [
            ts(0),
            ts(59),
            ts(1_700_000_123),
            ts(1_700_006_399),
            ts(-1),
            ts(-86_401),
            Utc.timestamp_millis_opt(1_700_000_000_999).unwrap(),
        ];

        for resolution in Resolution::LADDER {
            for timestamp in timestamps {
                let start = resolution.window_start(timestamp);
                assert!(start <= timestamp, "{resolution} {timestamp}");
                assert!(timestamp < start + resolution.duration(), "{resolution} {timestamp}");
                assert_eq!(resolution.window_start(start), start, "{resolution} {timestamp}");
                assert!(resolution.is_aligned(start));
            }
        }
    }

    #[test]
    fn test_window_start_is_epoch_aligned_not_calendar_aligned() {
        // 2023-11-14T22:13:20Z
        let timestamp = ts(1_700_000_000);

        assert_eq!(Resolution::FiveMin.window_start(timestamp), ts(1_699_999_800));
        assert_eq!(Resolution::FourHour.window_start(timestamp), ts(1_699_992_000));
        assert_eq!(Resolution::OneDay.window_start(timestamp), ts(1_699_920_000));
        assert_eq!(Resolution::OneMin.window_start(ts(-1)), ts(-60));
    }

    #[test]
    fn test_window_is_contained_in_parent() {
        let window = Resolution::ThirtyMin.window(ts(1_700_000_000));
        let parent = window.parent().unwrap();

        assert_eq!(parent.resolution, Resolution::OneHour);
        assert!(parent.start <= window.start);
        assert!(window.end() <= parent.end());
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end()));
    }
}
