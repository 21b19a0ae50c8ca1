//! Gap handling for aggregation windows with missing sub-bars.
//!
//! Exchanges trade irregularly, so a window can close with fewer sub-bars than the ladder
//! expects. The [`GapPolicy`] decides whether such a window is emitted now, emitted with a
//! partial marker, or held back until more data arrives or `max_wait` elapses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of missing sub-bars tolerated per window.
pub const DEFAULT_GAP_TOLERANCE: usize = 0;

/// Default time an incomplete window waits for late sub-bars (2 minutes).
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// What to do with a window that is still incomplete when `max_wait` elapses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Emit what exists, marked partial.
    #[default]
    ForceEmit,
    /// Discard the window without writing anything.
    Drop,
}

/// What to do with a window that received no sub-bars at all.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWindow {
    /// Emit nothing for the window.
    #[default]
    Skip,
    /// Emit a flat zero-volume bar at the stream's previous close, if one is known.
    CarryForward,
}

/// Gap policy configuration, loaded once at startup and shared read-only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct GapPolicyConfig {
    /// Maximum missing sub-bars for which a window is still emitted (as partial).
    pub gap_tolerance: usize,
    /// Time an incomplete window waits for more data before forced resolution.
    #[serde(with = "duration_secs")]
    pub max_wait: Duration,
    pub on_timeout: TimeoutAction,
    pub empty_window: EmptyWindow,
}

impl Default for GapPolicyConfig {
    fn default() -> Self {
        Self {
            gap_tolerance: DEFAULT_GAP_TOLERANCE,
            max_wait: DEFAULT_MAX_WAIT,
            on_timeout: TimeoutAction::default(),
            empty_window: EmptyWindow::default(),
        }
    }
}

impl GapPolicyConfig {
    pub fn with_gap_tolerance(mut self, gap_tolerance: usize) -> Self {
        self.gap_tolerance = gap_tolerance;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_on_timeout(mut self, on_timeout: TimeoutAction) -> Self {
        self.on_timeout = on_timeout;
        self
    }

    pub fn with_empty_window(mut self, empty_window: EmptyWindow) -> Self {
        self.empty_window = empty_window;
        self
    }
}

/// Outcome of evaluating a window against the [`GapPolicy`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum GapDecision {
    /// Every expected sub-bar is present.
    Complete,
    /// Some sub-bars are missing, but no more than the tolerance.
    PartialTolerated { missing: usize },
    /// Too many sub-bars are missing to emit yet.
    Incomplete { missing: usize },
}

impl GapDecision {
    pub fn is_ready(&self) -> bool {
        !matches!(self, GapDecision::Incomplete { .. })
    }

    pub fn missing(&self) -> usize {
        match self {
            GapDecision::Complete => 0,
            GapDecision::PartialTolerated { missing } | GapDecision::Incomplete { missing } => {
                *missing
            }
        }
    }
}

/// Resolution of an incomplete window once `max_wait` has elapsed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ForcedOutcome {
    Emit { missing: usize },
    Drop,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct GapPolicy {
    config: GapPolicyConfig,
}

impl GapPolicy {
    pub fn new(config: GapPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GapPolicyConfig {
        &self.config
    }

    pub fn max_wait(&self) -> Duration {
        self.config.max_wait
    }

    /// Decide how a window holding `present` of `expected` sub-bars should proceed.
    ///
    /// An empty window is never ready on its own; it is only resolved by timeout.
    pub fn decide(&self, expected: usize, present: usize) -> GapDecision {
        let missing = expected.saturating_sub(present);
        if missing == 0 {
            GapDecision::Complete
        } else if present > 0 && missing <= self.config.gap_tolerance {
            GapDecision::PartialTolerated { missing }
        } else {
            GapDecision::Incomplete { missing }
        }
    }

    /// Resolve a window that is still incomplete after `max_wait`, or at shutdown.
    pub fn force(&self, expected: usize, present: usize) -> ForcedOutcome {
        let missing = expected.saturating_sub(present);
        match self.config.on_timeout {
            TimeoutAction::ForceEmit if present > 0 => ForcedOutcome::Emit { missing },
            TimeoutAction::ForceEmit => match self.config.empty_window {
                EmptyWindow::CarryForward => ForcedOutcome::Emit { missing },
                EmptyWindow::Skip => ForcedOutcome::Drop,
            },
            TimeoutAction::Drop => ForcedOutcome::Drop,
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_policy_decide() {
        struct TestCase {
            gap_tolerance: usize,
            expected: usize,
            present: usize,
            decision: GapDecision,
        }

        let tests = vec![
            TestCase {
                // TC0: all sub-bars present
                gap_tolerance: 1,
                expected: 5,
                present: 5,
                decision: GapDecision::Complete,
            },
            TestCase {
                // TC1: missing exactly the tolerance
                gap_tolerance: 1,
                expected: 5,
                present: 4,
                decision: GapDecision::PartialTolerated { missing: 1 },
            },
            TestCase {
                // TC2: missing one more than the tolerance
                gap_tolerance: 1,
                expected: 5,
                present: 3,
                decision: GapDecision::Incomplete { missing: 2 },
            },
            TestCase {
                // TC3: zero tolerance
                gap_tolerance: 0,
                expected: 3,
                present: 2,
                decision: GapDecision::Incomplete { missing: 1 },
            },
            TestCase {
                // TC4: empty window is never ready, whatever the tolerance
                gap_tolerance: 10,
                expected: 2,
                present: 0,
                decision: GapDecision::Incomplete { missing: 2 },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let policy =
                GapPolicy::new(GapPolicyConfig::default().with_gap_tolerance(test.gap_tolerance));
            let actual = policy.decide(test.expected, test.present);
            assert_eq!(actual, test.decision, "TC{} failed", index);
            assert_eq!(actual.is_ready(), !matches!(test.decision, GapDecision::Incomplete { .. }));
        }
    }

    #[test]
    fn test_gap_policy_force() {
        struct TestCase {
            config: GapPolicyConfig,
            present: usize,
            expected: ForcedOutcome,
        }

        let tests = vec![
            TestCase {
                // TC0: force emit with data
                config: GapPolicyConfig::default(),
                present: 2,
                expected: ForcedOutcome::Emit { missing: 3 },
            },
            TestCase {
                // TC1: drop on timeout
                config: GapPolicyConfig::default().with_on_timeout(TimeoutAction::Drop),
                present: 2,
                expected: ForcedOutcome::Drop,
            },
            TestCase {
                // TC2: empty window skipped by default
                config: GapPolicyConfig::default(),
                present: 0,
                expected: ForcedOutcome::Drop,
            },
            TestCase {
                // TC3: empty window carried forward when configured
                config: GapPolicyConfig::default().with_empty_window(EmptyWindow::CarryForward),
                present: 0,
                expected: ForcedOutcome::Emit { missing: 5 },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = GapPolicy::new(test.config).force(5, test.present);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_gap_policy_config_deserialises_with_defaults() {
        let config: GapPolicyConfig =
            serde_json::from_str(r#"{ "gap_tolerance": 1, "max_wait": 30 }"#).unwrap();

        assert_eq!(config.gap_tolerance, 1);
        assert_eq!(config.max_wait, Duration::from_secs(30));
        assert_eq!(config.on_timeout, TimeoutAction::ForceEmit);
        assert_eq!(config.empty_window, EmptyWindow::Skip);
    }
}
