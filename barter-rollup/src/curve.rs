//! Fixed-width term-structure ("curve") snapshots.
//!
//! A snapshot carries three parallel arrays of [`TENOR_SLOTS`] optional values: implied forward,
//! implied amount and implied price, one triple per tenor. A `None` slot means nothing was
//! observed for that tenor in the window, which is not the same thing as a zero value.

use crate::{
    decimal::DecimalValue,
    error::RollupError,
    instrument::{FieldDimension, InstrumentId},
    resolution::{Resolution, Window},
};
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of standard tenor points on a curve.
pub const TENOR_SLOTS: usize = 16;

/// Fixed-width array of optional values, slot `i` holding tenor `i`.
pub type TenorSlots = [Option<DecimalValue>; TENOR_SLOTS];

/// Validated tenor slot index in `0..TENOR_SLOTS`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct TenorIndex(u8);

impl TenorIndex {
    pub fn new(index: usize) -> Result<Self, RollupError> {
        if index < TENOR_SLOTS {
            Ok(Self(index as u8))
        } else {
            Err(RollupError::InvalidTenorIndex(index))
        }
    }

    pub fn get(&self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<usize> for TenorIndex {
    type Error = RollupError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenorIndex> for usize {
    fn from(value: TenorIndex) -> Self {
        value.get()
    }
}

/// Implied values observed for one tenor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TenorPoint {
    pub implied_forward: DecimalValue,
    pub implied_amount: DecimalValue,
    pub implied_price: DecimalValue,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct CurveKey {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub field_dimension: FieldDimension,
    pub epoch: DateTime<Utc>,
}

/// Single tenor observation as delivered by ingestion.
///
/// `epoch` may be any timestamp inside the window; it is aligned when accumulated.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TenorObservation {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub field_dimension: FieldDimension,
    pub epoch: DateTime<Utc>,
    pub tenor: usize,
    #[serde(flatten)]
    pub point: TenorPoint,
}

impl TenorObservation {
    pub fn key(&self) -> CurveKey {
        CurveKey {
            instrument: self.instrument,
            resolution: self.resolution,
            field_dimension: self.field_dimension.clone(),
            epoch: self.resolution.window_start(self.epoch),
        }
    }
}

/// Term-structure snapshot keyed by (instrument, resolution, field dimension, epoch).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct CurveSnapshot {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub field_dimension: FieldDimension,
    pub epoch: DateTime<Utc>,
    pub implied_forward: TenorSlots,
    pub implied_amount: TenorSlots,
    pub implied_price: TenorSlots,
}

impl CurveSnapshot {
    pub fn key(&self) -> CurveKey {
        CurveKey {
            instrument: self.instrument,
            resolution: self.resolution,
            field_dimension: self.field_dimension.clone(),
            epoch: self.epoch,
        }
    }

    /// Triple for `tenor`, or `None` if the tenor was not observed.
    pub fn point(&self, tenor: TenorIndex) -> Option<TenorPoint> {
        let slot = tenor.get();
        Some(TenorPoint {
            implied_forward: self.implied_forward[slot]?,
            implied_amount: self.implied_amount[slot]?,
            implied_price: self.implied_price[slot]?,
        })
    }

    pub fn observed_tenors(&self) -> usize {
        self.implied_forward.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Build a snapshot for `window` from per-tenor observations.
///
/// Tenors missing from `observations` stay `None` in all three arrays. No interpolation and no
/// zero-fill is ever applied.
pub fn build_snapshot<I>(
    instrument: InstrumentId,
    field_dimension: FieldDimension,
    window: Window,
    observations: I,
) -> Result<CurveSnapshot, RollupError>
where
    I: IntoIterator<Item = (usize, TenorPoint)>,
{
    let mut snapshot = CurveSnapshot {
        instrument,
        resolution: window.resolution,
        field_dimension,
        epoch: window.start,
        implied_forward: [None; TENOR_SLOTS],
        implied_amount: [None; TENOR_SLOTS],
        implied_price: [None; TENOR_SLOTS],
    };

    for (index, point) in observations {
        let slot = TenorIndex::new(index)?.get();
        snapshot.implied_forward[slot] = Some(point.implied_forward);
        snapshot.implied_amount[slot] = Some(point.implied_amount);
        snapshot.implied_price[slot] = Some(point.implied_price);
    }

    Ok(snapshot)
}

/// Accumulates tenor observations per [`CurveKey`] until the matching window closes.
///
/// Within a window the latest observation for a tenor replaces any earlier one. Observations
/// are retained after their window closes so a late observation rebuilds the whole snapshot
/// rather than overwriting it with a sparser one.
#[derive(Debug, Default)]
pub struct CurveBuilder {
    pending: FnvHashMap<CurveKey, BTreeMap<TenorIndex, TenorPoint>>,
    closed: FnvHashMap<InstrumentId, FnvHashSet<Window>>,
}

impl CurveBuilder {
    /// Record an observation. Returns a rebuilt snapshot if its window has already closed.
    pub fn observe(
        &mut self,
        observation: TenorObservation,
    ) -> Result<Option<CurveSnapshot>, RollupError> {
        let tenor = TenorIndex::new(observation.tenor)?;
        let key = observation.key();
        let window = key.resolution.window(key.epoch);

        let is_closed = self.is_closed(key.instrument, window);
        let points = self.pending.entry(key.clone()).or_default();
        points.insert(tenor, observation.point);

        if is_closed {
            Self::build(&key, window, points).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Build snapshots for every field dimension observed in `window` for `instrument`.
    pub fn close(&mut self, instrument: InstrumentId, window: Window) -> Vec<CurveSnapshot> {
        self.closed.entry(instrument).or_default().insert(window);
        self.pending
            .iter()
            .filter(|(key, _)| {
                key.instrument == instrument
                    && key.resolution == window.resolution
                    && key.epoch == window.start
            })
            .filter_map(|(key, points)| Self::build(key, window, points).ok())
            .collect()
    }

    /// Close every window that still has observations, eg/ on shutdown.
    pub fn close_all(&mut self) -> Vec<CurveSnapshot> {
        let open = self
            .pending
            .keys()
            .map(|key| (key.instrument, key.resolution.window(key.epoch)))
            .filter(|(instrument, window)| !self.is_closed(*instrument, *window))
            .collect::<FnvHashSet<_>>();

        open.into_iter()
            .flat_map(|(instrument, window)| self.close(instrument, window))
            .collect()
    }

    fn is_closed(&self, instrument: InstrumentId, window: Window) -> bool {
        self.closed
            .get(&instrument)
            .is_some_and(|windows| windows.contains(&window))
    }

    fn build(
        key: &CurveKey,
        window: Window,
        points: &BTreeMap<TenorIndex, TenorPoint>,
    ) -> Result<CurveSnapshot, RollupError> {
        build_snapshot(
            key.instrument,
            key.field_dimension.clone(),
            window,
            points.iter().map(|(tenor, point)| (tenor.get(), *point)),
        )
    }

    /// Discard state for windows that ended before their instrument's horizon.
    ///
    /// Instruments for which `horizon` yields `None` are left untouched. Returns how many
    /// discarded windows never closed, ie/ never produced a snapshot.
    pub fn evict<F>(&mut self, horizon: F) -> usize
    where
        F: Fn(InstrumentId) -> Option<DateTime<Utc>>,
    {
        let mut unclosed = 0;
        let closed = &self.closed;
        self.pending.retain(|key, _| {
            let window = key.resolution.window(key.epoch);
            let keep = horizon(key.instrument).is_none_or(|horizon| window.end() >= horizon);
            let was_closed = closed
                .get(&key.instrument)
                .is_some_and(|windows| windows.contains(&window));
            if !keep && !was_closed {
                unclosed += 1;
            }
            keep
        });

        self.closed.retain(|instrument, windows| {
            if let Some(horizon) = horizon(*instrument) {
                windows.retain(|window| window.end() >= horizon);
            }
            !windows.is_empty()
        });
        unclosed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
