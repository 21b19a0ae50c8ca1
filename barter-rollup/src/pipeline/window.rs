//! Per (instrument, resolution) window tracking.
//!
//! A [`StreamAggregator`] owns every window of one stream that is still open, waiting on the
//! [`GapPolicy`], or retained to absorb late sub-bars. Windows leave the stream strictly in epoch
//! order: a window that is ready but sits behind a deferred one is held until the earlier window
//! resolves.

use crate::{
    aggregator::aggregate,
    bar::{Bar, Completeness, RollupBar},
    decimal::{DecimalValue, Precision},
    error::RollupError,
    gap::{EmptyWindow, ForcedOutcome, GapDecision, GapPolicy},
    instrument::{FieldDimension, InstrumentId},
    resolution::{Resolution, Window},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Upper bound on empty windows materialised for carry-forward in a single gap.
const MAX_CARRY_FORWARD_WINDOWS: usize = 1_440;

/// Lifecycle of a single window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WindowState {
    /// Still accepting sub-bars.
    Open,
    /// Passed the [`GapPolicy`] but held behind an earlier unresolved window.
    Ready(GapDecision),
    /// Closed with too many sub-bars missing, waiting until `deadline`.
    Deferred { deadline: DateTime<Utc> },
    /// Emitted, possibly forced after a deferral.
    Emitted { forced: bool },
    /// Discarded after timing out.
    Dropped,
    /// Aggregation failed, eg/ precision overflow.
    Failed,
}

impl WindowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WindowState::Emitted { .. } | WindowState::Dropped | WindowState::Failed
        )
    }
}

/// Observable outcome of feeding a [`StreamAggregator`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StreamEvent {
    /// First emission of a window.
    Emitted(RollupBar),
    /// Corrected emission of an already emitted window after late data.
    Reemitted(RollupBar),
    Dropped { window: Window, missing: usize },
    Failed { window: Window, error: RollupError },
    /// Sub-bar arrived for a window already evicted from retention.
    Late { window: Window, epoch: DateTime<Utc> },
}

#[derive(Debug)]
struct WindowSlot {
    window: Window,
    sub_bars: BTreeMap<DateTime<Utc>, Bar>,
    /// Epochs of held sub-bars that were themselves emitted partial.
    partial: BTreeSet<DateTime<Utc>>,
    state: WindowState,
}

impl WindowSlot {
    fn new(window: Window) -> Self {
        Self {
            window,
            sub_bars: BTreeMap::new(),
            partial: BTreeSet::new(),
            state: WindowState::Open,
        }
    }
}

/// Window state machine for one (instrument, resolution) stream.
///
/// Time only moves forward. `data_time` is the end of the latest sub-bar seen and decides when a
/// window has closed; `now` additionally follows external ticks and drives deadlines.
#[derive(Debug)]
pub struct StreamAggregator {
    instrument: InstrumentId,
    resolution: Resolution,
    sub_resolution: Resolution,
    field_dimension: FieldDimension,
    policy: GapPolicy,
    precision: Precision,
    late_retention: TimeDelta,
    windows: BTreeMap<DateTime<Utc>, WindowSlot>,
    data_time: Option<DateTime<Utc>>,
    now: Option<DateTime<Utc>>,
    evicted_until: Option<DateTime<Utc>>,
    last_close: Option<DecimalValue>,
}

impl StreamAggregator {
    /// Construct a stream for `resolution`. The base resolution has no sub-bars and is rejected.
    pub fn new(
        instrument: InstrumentId,
        resolution: Resolution,
        field_dimension: FieldDimension,
        policy: GapPolicy,
        precision: Precision,
        late_retention: std::time::Duration,
    ) -> Option<Self> {
        let sub_resolution = resolution.finer()?;
        Some(Self {
            instrument,
            resolution,
            sub_resolution,
            field_dimension,
            policy,
            precision,
            late_retention: TimeDelta::from_std(late_retention).unwrap_or(TimeDelta::MAX),
            windows: BTreeMap::new(),
            data_time: None,
            now: None,
            evicted_until: None,
            last_close: None,
        })
    }

    /// State of the window starting at `start`, if still tracked.
    pub fn state(&self, start: DateTime<Utc>) -> Option<WindowState> {
        self.windows.get(&start).map(|slot| slot.state)
    }

    /// Number of windows currently tracked, terminal ones included.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Feed one sub-bar with the completeness it was emitted with.
    ///
    /// A sub-bar with the epoch of one already held replaces it.
    pub fn on_sub_bar(&mut self, sub_bar: Bar, completeness: Completeness) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let window = self.resolution.window(sub_bar.epoch);

        if !self.sub_resolution.is_aligned(sub_bar.epoch) {
            events.push(StreamEvent::Failed {
                window,
                error: RollupError::OutOfWindow {
                    resolution: self.resolution,
                    window_start: window.start,
                    epoch: sub_bar.epoch,
                },
            });
            return events;
        }

        let sub_end = sub_bar.epoch + self.sub_resolution.duration();
        self.data_time = Some(self.data_time.map_or(sub_end, |time| time.max(sub_end)));
        self.advance_now(sub_end);

        if !self.windows.contains_key(&window.start)
            && self.evicted_until.is_some_and(|until| window.start < until)
        {
            warn!(
                instrument = %self.instrument,
                resolution = %self.resolution,
                %window,
                epoch = %sub_bar.epoch,
                "sub-bar arrived after window was evicted"
            );
            events.push(StreamEvent::Late {
                window,
                epoch: sub_bar.epoch,
            });
            return events;
        }

        self.materialise_empty_windows(window);
        let slot = self
            .windows
            .entry(window.start)
            .or_insert_with(|| WindowSlot::new(window));
        if completeness.is_partial() {
            slot.partial.insert(sub_bar.epoch);
        } else {
            slot.partial.remove(&sub_bar.epoch);
        }
        slot.sub_bars.insert(sub_bar.epoch, sub_bar);

        if slot.state.is_terminal() {
            if let Some(event) = self.on_late_sub_bar(window) {
                events.push(event);
            }
        }

        self.advance(&mut events);
        self.evict();
        events
    }

    /// Advance logical time to `time` and resolve any deadline that has passed.
    pub fn on_tick(&mut self, time: DateTime<Utc>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.advance_now(time);
        self.advance(&mut events);
        self.evict();
        events
    }

    /// Resolve every outstanding window as if its deadline had passed, in epoch order.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let starts = self
            .windows
            .iter()
            .filter(|(_, slot)| !slot.state.is_terminal())
            .map(|(start, _)| *start)
            .collect::<Vec<_>>();

        for start in starts {
            let Some(slot) = self.windows.get(&start) else {
                continue;
            };
            let expected = self.resolution.sub_bar_count();
            let decision = self.policy.decide(expected, slot.sub_bars.len());
            if decision.is_ready() {
                self.emit(start, decision.missing(), false, &mut events);
            } else {
                self.force(start, &mut events);
            }
        }
        events
    }

    fn advance_now(&mut self, time: DateTime<Utc>) {
        self.now = Some(self.now.map_or(time, |now| now.max(time)));
    }

    fn max_wait(&self) -> TimeDelta {
        TimeDelta::from_std(self.policy.max_wait()).unwrap_or(TimeDelta::MAX)
    }

    fn offset(time: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
        time.checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A window has closed once the stream has moved past it, all sub-bars are present, or
    /// external time has run a full `max_wait` beyond its end.
    fn is_closed(&self, slot: &WindowSlot) -> bool {
        let end = slot.window.end();
        slot.sub_bars.len() >= self.resolution.sub_bar_count()
            || self.data_time.is_some_and(|time| time >= end)
            || self
                .now
                .is_some_and(|now| now >= Self::offset(end, self.max_wait()))
    }

    fn advance(&mut self, events: &mut Vec<StreamEvent>) {
        let Some(now) = self.now else {
            return;
        };
        let expected = self.resolution.sub_bar_count();
        let deadline_after = Self::offset(now, self.max_wait());

        let starts = self
            .windows
            .iter()
            .filter(|(_, slot)| !slot.state.is_terminal())
            .map(|(start, _)| *start)
            .collect::<Vec<_>>();

        let mut blocked = false;
        for start in starts {
            let Some(slot) = self.windows.get(&start) else {
                continue;
            };
            if !self.is_closed(slot) {
                break;
            }

            let decision = self.policy.decide(expected, slot.sub_bars.len());
            let state = slot.state;
            match (decision, state) {
                (decision, _) if decision.is_ready() => {
                    if blocked {
                        self.set_state(start, WindowState::Ready(decision));
                    } else {
                        self.emit(start, decision.missing(), false, events);
                    }
                }
                (_, WindowState::Deferred { deadline }) if now >= deadline => {
                    if blocked {
                        continue;
                    }
                    self.force(start, events);
                }
                (_, WindowState::Deferred { .. }) => blocked = true,
                (GapDecision::Incomplete { missing }, _) => {
                    warn!(
                        instrument = %self.instrument,
                        resolution = %self.resolution,
                        window = %slot.window,
                        missing,
                        deadline = %deadline_after,
                        "window deferred awaiting missing sub-bars"
                    );
                    self.set_state(
                        start,
                        WindowState::Deferred {
                            deadline: deadline_after,
                        },
                    );
                    if !blocked && now >= deadline_after {
                        self.force(start, events);
                    } else {
                        blocked = true;
                    }
                }
                (GapDecision::Complete | GapDecision::PartialTolerated { .. }, _) => {}
            }
        }
    }

    fn set_state(&mut self, start: DateTime<Utc>, state: WindowState) {
        if let Some(slot) = self.windows.get_mut(&start) {
            slot.state = state;
        }
    }

    fn force(&mut self, start: DateTime<Utc>, events: &mut Vec<StreamEvent>) {
        let Some(slot) = self.windows.get(&start) else {
            return;
        };
        let window = slot.window;
        let expected = self.resolution.sub_bar_count();

        match self.policy.force(expected, slot.sub_bars.len()) {
            ForcedOutcome::Emit { missing } => {
                warn!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    %window,
                    missing,
                    "force emitting incomplete window"
                );
                self.emit(start, missing, true, events);
            }
            ForcedOutcome::Drop => {
                let missing = expected.saturating_sub(slot.sub_bars.len());
                warn!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    %window,
                    missing,
                    "dropping incomplete window"
                );
                self.set_state(start, WindowState::Dropped);
                events.push(StreamEvent::Dropped { window, missing });
            }
        }
    }

    fn build(&self, slot: &WindowSlot, missing: usize) -> Result<Option<RollupBar>, RollupError> {
        let bar = if slot.sub_bars.is_empty() {
            match self.last_close {
                Some(close) => Bar::flat(slot.window.start, close),
                None => return Ok(None),
            }
        } else {
            let sub_bars = slot.sub_bars.values().cloned().collect::<Vec<_>>();
            aggregate(&sub_bars, slot.window, &self.precision)?
        };

        let completeness = match missing + slot.partial.len() {
            0 => Completeness::Complete,
            missing => Completeness::Partial { missing },
        };

        Ok(Some(RollupBar {
            instrument: self.instrument,
            resolution: self.resolution,
            field_dimension: self.field_dimension.clone(),
            bar,
            completeness,
        }))
    }

    fn emit(
        &mut self,
        start: DateTime<Utc>,
        missing: usize,
        forced: bool,
        events: &mut Vec<StreamEvent>,
    ) {
        let Some(slot) = self.windows.get(&start) else {
            return;
        };
        let window = slot.window;

        match self.build(slot, missing) {
            Ok(Some(rollup)) => {
                debug!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    %window,
                    completeness = ?rollup.completeness,
                    "window emitted"
                );
                self.last_close = Some(rollup.bar.close);
                self.set_state(start, WindowState::Emitted { forced });
                events.push(StreamEvent::Emitted(rollup));
            }
            Ok(None) => {
                // Empty window with nothing to carry forward yet
                self.set_state(start, WindowState::Dropped);
                events.push(StreamEvent::Dropped { window, missing });
            }
            Err(error) => {
                warn!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    %window,
                    %error,
                    "window aggregation failed"
                );
                self.set_state(start, WindowState::Failed);
                events.push(StreamEvent::Failed { window, error });
            }
        }
    }

    /// Re-evaluate a terminal window that received a sub-bar after resolving.
    fn on_late_sub_bar(&mut self, window: Window) -> Option<StreamEvent> {
        let slot = self.windows.get(&window.start)?;
        let expected = self.resolution.sub_bar_count();
        let decision = self.policy.decide(expected, slot.sub_bars.len());

        let reemit = match slot.state {
            WindowState::Emitted { .. } => true,
            WindowState::Dropped | WindowState::Failed => decision.is_ready(),
            _ => false,
        };
        if !reemit {
            return None;
        }

        match self.build(slot, decision.missing()) {
            Ok(Some(rollup)) => {
                debug!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    %window,
                    completeness = ?rollup.completeness,
                    "window re-emitted after late sub-bar"
                );
                self.set_state(window.start, WindowState::Emitted { forced: false });
                Some(StreamEvent::Reemitted(rollup))
            }
            Ok(None) => None,
            Err(error) => {
                self.set_state(window.start, WindowState::Failed);
                Some(StreamEvent::Failed { window, error })
            }
        }
    }

    /// Track empty windows between the newest tracked window and `window` so they can be
    /// carried forward on timeout.
    fn materialise_empty_windows(&mut self, window: Window) {
        if self.policy.config().empty_window != EmptyWindow::CarryForward {
            return;
        }
        let Some((&latest, _)) = self.windows.last_key_value() else {
            return;
        };

        let step = self.resolution.duration();
        let mut start = latest + step;
        let mut filled = 0;
        while start < window.start && filled < MAX_CARRY_FORWARD_WINDOWS {
            self.windows.insert(
                start,
                WindowSlot::new(Window {
                    resolution: self.resolution,
                    start,
                }),
            );
            start += step;
            filled += 1;
        }
    }

    /// Discard terminal windows that ended more than `late_retention` ago.
    fn evict(&mut self) {
        let Some(data_time) = self.data_time else {
            return;
        };
        let Some(horizon) = data_time.checked_sub_signed(self.late_retention) else {
            return;
        };

        while let Some((&start, slot)) = self.windows.first_key_value() {
            if !slot.state.is_terminal() || slot.window.end() > horizon {
                break;
            }
            let end = slot.window.end();
            self.windows.remove(&start);
            self.evicted_until = Some(self.evicted_until.map_or(end, |until| until.max(end)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bar::test_utils::{bar, minute},
        gap::{GapPolicyConfig, TimeoutAction},
    };
    use std::time::Duration;

    fn sub_bar(index: i64, price: &str) -> Bar {
        bar(minute(index), [price, price, price, price], "1", 1)
    }

    fn stream(config: GapPolicyConfig) -> StreamAggregator {
        StreamAggregator::new(
            InstrumentId(1),
            Resolution::FiveMin,
            FieldDimension::default(),
            GapPolicy::new(config),
            Precision::default(),
            Duration::from_secs(15 * 60),
        )
        .unwrap()
    }

    fn feed(
        stream: &mut StreamAggregator,
        minutes: impl IntoIterator<Item = i64>,
    ) -> Vec<StreamEvent> {
        minutes
            .into_iter()
            .flat_map(|index| stream.on_sub_bar(sub_bar(index, "100"), Completeness::Complete))
            .collect()
    }

    fn emitted(events: &[StreamEvent]) -> Vec<(DateTime<Utc>, Completeness)> {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Emitted(rollup) => Some((rollup.bar.epoch, rollup.completeness)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_base_resolution_has_no_stream() {
        assert!(
            StreamAggregator::new(
                InstrumentId(1),
                Resolution::OneMin,
                FieldDimension::default(),
                GapPolicy::default(),
                Precision::default(),
                Duration::from_secs(60),
            )
            .is_none()
        );
    }

    #[test]
    fn test_complete_window_emits_as_soon_as_full() {
        let mut stream = stream(GapPolicyConfig::default());

        let events = feed(&mut stream, 0..4);
        assert!(events.is_empty());
        assert_eq!(stream.state(minute(0)), Some(WindowState::Open));

        let events = feed(&mut stream, [4]);
        assert_eq!(emitted(&events), vec![(minute(0), Completeness::Complete)]);
        assert_eq!(
            stream.state(minute(0)),
            Some(WindowState::Emitted { forced: false })
        );
    }

    #[test]
    fn test_gap_tolerance_decides_emission() {
        struct TestCase {
            tolerance: usize,
            minutes: Vec<i64>,
            expected: Vec<(DateTime<Utc>, Completeness)>,
        }

        let tests = vec![
            TestCase {
                // TC0: tolerance 1, one missing sub-bar emits partial once the window closes
                tolerance: 1,
                minutes: vec![0, 1, 2, 4, 5],
                expected: vec![(minute(0), Completeness::Partial { missing: 1 })],
            },
            TestCase {
                // TC1: tolerance 1, two missing sub-bars defers
                tolerance: 1,
                minutes: vec![0, 1, 4, 5],
                expected: vec![],
            },
            TestCase {
                // TC2: tolerance 0, any gap defers
                tolerance: 0,
                minutes: vec![0, 1, 2, 4, 5],
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut stream = stream(GapPolicyConfig::default().with_gap_tolerance(test.tolerance));
            let events = feed(&mut stream, test.minutes);
            assert_eq!(emitted(&events), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_deferred_window_force_emits_after_max_wait() {
        let mut stream = stream(GapPolicyConfig::default().with_max_wait(Duration::from_secs(120)));

        let events = feed(&mut stream, [0, 1, 2, 4, 5]);
        assert!(events.is_empty());
        assert_eq!(
            stream.state(minute(0)),
            Some(WindowState::Deferred {
                deadline: minute(7)
            })
        );

        // Late sub-bar inside the deferral completes the window normally
        let events = feed(&mut stream, [3]);
        assert_eq!(emitted(&events), vec![(minute(0), Completeness::Complete)]);

        // Next window misses minute 7, defers, then force emits at its deadline
        let events = feed(&mut stream, [6, 8, 9, 10]);
        assert!(emitted(&events).is_empty());
        let events = stream.on_tick(minute(12));
        assert_eq!(
            emitted(&events),
            vec![(minute(5), Completeness::Partial { missing: 1 })]
        );
        assert_eq!(
            stream.state(minute(5)),
            Some(WindowState::Emitted { forced: true })
        );
    }

    #[test]
    fn test_drop_on_timeout() {
        let mut stream = stream(
            GapPolicyConfig::default()
                .with_max_wait(Duration::ZERO)
                .with_on_timeout(TimeoutAction::Drop),
        );

        let events = feed(&mut stream, [0, 1, 5]);
        assert_eq!(
            events,
            vec![StreamEvent::Dropped {
                window: Resolution::FiveMin.window(minute(0)),
                missing: 3
            }]
        );
        assert_eq!(stream.state(minute(0)), Some(WindowState::Dropped));
    }

    #[test]
    fn test_ready_window_waits_behind_deferred_window() {
        let mut stream = stream(GapPolicyConfig::default().with_max_wait(Duration::from_secs(600)));

        // Window 0 misses minute 2, window 5 is complete
        let events = feed(&mut stream, [0, 1, 3, 4, 5, 6, 7, 8, 9]);
        assert!(emitted(&events).is_empty());
        assert_eq!(
            stream.state(minute(5)),
            Some(WindowState::Ready(GapDecision::Complete))
        );

        // Resolving window 0 releases both, in epoch order
        assert!(stream.on_tick(minute(14)).is_empty());
        let events = stream.on_tick(minute(15));
        assert_eq!(
            emitted(&events),
            vec![
                (minute(0), Completeness::Partial { missing: 1 }),
                (minute(5), Completeness::Complete),
            ]
        );
    }

    #[test]
    fn test_late_sub_bar_reemits_within_retention() {
        let mut stream = stream(GapPolicyConfig::default().with_gap_tolerance(1));

        let events = feed(&mut stream, [0, 1, 2, 3, 5]);
        assert_eq!(
            emitted(&events),
            vec![(minute(0), Completeness::Partial { missing: 1 })]
        );

        let events = stream.on_sub_bar(sub_bar(4, "101"), Completeness::Complete);
        let [StreamEvent::Reemitted(rollup)] = events.as_slice() else {
            panic!("expected re-emission, got {events:?}");
        };
        assert_eq!(rollup.completeness, Completeness::Complete);
        assert_eq!(rollup.bar.close, "101".parse().unwrap());
        assert_eq!(rollup.bar.trades, 5);
    }

    #[test]
    fn test_sub_bar_after_eviction_is_reported_late() {
        let mut stream = StreamAggregator::new(
            InstrumentId(1),
            Resolution::FiveMin,
            FieldDimension::default(),
            GapPolicy::default(),
            Precision::default(),
            Duration::from_secs(5 * 60),
        )
        .unwrap();

        feed(&mut stream, 0..20);
        assert!(stream.state(minute(0)).is_none());

        let events = stream.on_sub_bar(sub_bar(2, "100"), Completeness::Complete);
        assert_eq!(
            events,
            vec![StreamEvent::Late {
                window: Resolution::FiveMin.window(minute(0)),
                epoch: minute(2),
            }]
        );
    }

    #[test]
    fn test_carry_forward_emits_flat_bar_for_empty_window() {
        let mut stream = stream(
            GapPolicyConfig::default()
                .with_max_wait(Duration::ZERO)
                .with_empty_window(EmptyWindow::CarryForward),
        );

        feed(&mut stream, 0..5);
        let events = feed(&mut stream, [10]);
        let [StreamEvent::Emitted(rollup)] = events.as_slice() else {
            panic!("expected carried forward bar, got {events:?}");
        };
        assert_eq!(rollup.bar, Bar::flat(minute(5), "100".parse().unwrap()));
        assert_eq!(rollup.completeness, Completeness::Partial { missing: 5 });
    }

    #[test]
    fn test_flush_resolves_outstanding_windows() {
        let mut stream = stream(GapPolicyConfig::default());
        feed(&mut stream, [0, 1, 2]);

        let events = stream.flush();
        assert_eq!(
            emitted(&events),
            vec![(minute(0), Completeness::Partial { missing: 2 })]
        );
        assert!(stream.flush().is_empty());
    }

    #[test]
    fn test_precision_overflow_fails_only_its_window() {
        let mut stream = StreamAggregator::new(
            InstrumentId(1),
            Resolution::FiveMin,
            FieldDimension::default(),
            GapPolicy::default(),
            Precision::new(4, 2),
            Duration::from_secs(15 * 60),
        )
        .unwrap();

        let events = (0..5)
            .flat_map(|index| {
                let sub_bar = bar(minute(index), ["1", "1", "1", "1"], "999.9", 1);
                stream.on_sub_bar(sub_bar, Completeness::Complete)
            })
            .collect::<Vec<_>>();
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Failed {
                error: RollupError::PrecisionOverflow { .. },
                ..
            }]
        ));
        assert_eq!(stream.state(minute(0)), Some(WindowState::Failed));

        let events = feed(&mut stream, 5..10);
        assert_eq!(emitted(&events), vec![(minute(5), Completeness::Complete)]);
    }

    #[test]
    fn test_partial_sub_bar_marks_window_partial() {
        let mut stream = stream(GapPolicyConfig::default());

        feed(&mut stream, 0..4);
        let events = stream.on_sub_bar(sub_bar(4, "100"), Completeness::Partial { missing: 2 });
        assert_eq!(
            emitted(&events),
            vec![(minute(0), Completeness::Partial { missing: 1 })]
        );

        // A corrected sub-bar clears the marker on re-emission
        let events = stream.on_sub_bar(sub_bar(4, "100"), Completeness::Complete);
        let [StreamEvent::Reemitted(rollup)] = events.as_slice() else {
            panic!("expected re-emission, got {events:?}");
        };
        assert_eq!(rollup.completeness, Completeness::Complete);
    }

    #[test]
    fn test_misaligned_sub_bar_fails() {
        let mut stream = stream(GapPolicyConfig::default());
        let mut misaligned = sub_bar(0, "1");
        misaligned.epoch += TimeDelta::seconds(30);

        let events = stream.on_sub_bar(misaligned, Completeness::Complete);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Failed {
                error: RollupError::OutOfWindow { .. },
                ..
            }]
        ));
    }
}
