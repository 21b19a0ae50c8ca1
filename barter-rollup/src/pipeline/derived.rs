use super::{Context, Failure, FailureKind, ShutdownMode};
use crate::{
    bar::Bar,
    curve::{CurveBuilder, CurveSnapshot, TenorObservation},
    instrument::InstrumentId,
    premium::{PremiumIndex, PremiumPair, compute_premium},
    resolution::Resolution,
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) enum DerivedMsg {
    /// Bar for `resolution` has closed, at first emission or after a correction.
    Closed {
        instrument: InstrumentId,
        resolution: Resolution,
        bar: Bar,
    },
    Tenor(TenorObservation),
    Shutdown(ShutdownMode),
}

type CloseKey = (InstrumentId, Resolution, DateTime<Utc>);

/// Builds curve snapshots and premium indices from closed bars of every instrument.
pub(crate) struct DerivedWorker {
    ctx: Context,
    curves: CurveBuilder,
    pairs: Vec<PremiumPair>,
    closes: FnvHashMap<CloseKey, Bar>,
    data_time: FnvHashMap<InstrumentId, DateTime<Utc>>,
    late_retention: TimeDelta,
}

impl DerivedWorker {
    pub fn new(ctx: Context) -> Self {
        let pairs = ctx.config.premium_pairs.clone();
        let late_retention =
            TimeDelta::from_std(ctx.config.late_retention).unwrap_or(TimeDelta::MAX);
        Self {
            ctx,
            curves: CurveBuilder::default(),
            pairs,
            closes: FnvHashMap::default(),
            data_time: FnvHashMap::default(),
            late_retention,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<DerivedMsg>) {
        let mode = loop {
            match rx.recv().await {
                Some(DerivedMsg::Closed {
                    instrument,
                    resolution,
                    bar,
                }) => self.on_closed(instrument, resolution, bar).await,
                Some(DerivedMsg::Tenor(observation)) => self.on_tenor(observation).await,
                Some(DerivedMsg::Shutdown(mode)) => break mode,
                None => break ShutdownMode::Flush,
            }
        };

        if mode == ShutdownMode::Flush {
            for snapshot in self.curves.close_all() {
                self.write_snapshot(snapshot).await;
            }
        }
        debug!(?mode, "derived worker stopped");
    }

    async fn on_closed(&mut self, instrument: InstrumentId, resolution: Resolution, bar: Bar) {
        let window = bar.window(resolution);

        for snapshot in self.curves.close(instrument, window) {
            self.write_snapshot(snapshot).await;
        }

        let pairs = self
            .pairs
            .iter()
            .filter(|pair| pair.spot == instrument || pair.futures == instrument)
            .copied()
            .collect::<Vec<_>>();
        if !pairs.is_empty() {
            self.closes.insert((instrument, resolution, window.start), bar);
            for pair in pairs {
                self.derive_premium(pair, resolution, window.start).await;
            }
        }

        // Forced coarser windows can end far ahead of the data, so only base bars move time
        if resolution == Resolution::BASE {
            self.evict(instrument, window.end());
        }
    }

    async fn on_tenor(&mut self, observation: TenorObservation) {
        let key = observation.key();
        match self.curves.observe(observation) {
            Ok(Some(snapshot)) => self.write_snapshot(snapshot).await,
            Ok(None) => {}
            Err(error) => {
                warn!(
                    instrument = %key.instrument,
                    epoch = %key.epoch,
                    %error,
                    "rejecting tenor observation"
                );
                self.ctx.fail(Failure {
                    instrument: key.instrument,
                    resolution: key.resolution,
                    epoch: key.epoch,
                    kind: FailureKind::InvalidInput(error),
                });
            }
        }
    }

    /// Compute the premium for `pair` once both legs have closed for the same window.
    async fn derive_premium(
        &mut self,
        pair: PremiumPair,
        resolution: Resolution,
        epoch: DateTime<Utc>,
    ) {
        let (Some(spot), Some(futures)) = (
            self.closes.get(&(pair.spot, resolution, epoch)),
            self.closes.get(&(pair.futures, resolution, epoch)),
        ) else {
            return;
        };

        match compute_premium(spot, futures, &self.ctx.config.precision) {
            Ok(premium_index) => {
                let premium = PremiumIndex {
                    spot: pair.spot,
                    futures: pair.futures,
                    resolution,
                    epoch,
                    premium_index,
                };
                debug!(
                    spot = %pair.spot,
                    futures = %pair.futures,
                    %resolution,
                    %epoch,
                    %premium_index,
                    "premium index derived"
                );
                self.ctx
                    .persist("premium_index", (pair.spot, resolution, epoch), || {
                        self.ctx.store.upsert_premium_index(&premium)
                    })
                    .await;
            }
            Err(error) => {
                warn!(
                    spot = %pair.spot,
                    futures = %pair.futures,
                    %resolution,
                    %epoch,
                    %error,
                    "premium index not derived"
                );
                self.ctx.fail(Failure {
                    instrument: pair.spot,
                    resolution,
                    epoch,
                    kind: FailureKind::Aggregation(error),
                });
            }
        }
    }

    async fn write_snapshot(&self, snapshot: CurveSnapshot) {
        debug!(
            instrument = %snapshot.instrument,
            resolution = %snapshot.resolution,
            epoch = %snapshot.epoch,
            tenors = snapshot.observed_tenors(),
            "curve snapshot built"
        );
        self.ctx
            .persist(
                "curve_snapshot",
                (snapshot.instrument, snapshot.resolution, snapshot.epoch),
                || self.ctx.store.upsert_curve_snapshot(&snapshot),
            )
            .await;
    }

    /// Discard state older than `late_retention` behind each instrument's own data time.
    fn evict(&mut self, instrument: InstrumentId, window_end: DateTime<Utc>) {
        let latest = self.data_time.entry(instrument).or_insert(window_end);
        *latest = (*latest).max(window_end);

        let horizons = Horizons {
            latest: self.data_time.values().max().copied(),
            data_time: &self.data_time,
            pairs: &self.pairs,
            late_retention: self.late_retention,
        };
        self.closes.retain(|(instrument, resolution, epoch), _| {
            horizons
                .get(*instrument)
                .is_none_or(|horizon| *epoch + resolution.duration() >= horizon)
        });
        let evicted = self.curves.evict(|instrument| horizons.get(instrument));
        if evicted > 0 {
            warn!(
                %instrument,
                evicted,
                pending = self.curves.pending(),
                "discarded tenor observations for windows that never closed"
            );
        }
    }
}

/// Per-instrument eviction horizons.
///
/// An instrument keeps `late_retention` of history behind its own data time, or behind a premium
/// partner that lags it by no more than `late_retention`. Partners further behind are treated as
/// idle and no longer hold state back. Instruments without base bars follow the latest data time.
struct Horizons<'a> {
    latest: Option<DateTime<Utc>>,
    data_time: &'a FnvHashMap<InstrumentId, DateTime<Utc>>,
    pairs: &'a [PremiumPair],
    late_retention: TimeDelta,
}

impl Horizons<'_> {
    fn get(&self, instrument: InstrumentId) -> Option<DateTime<Utc>> {
        let own = self.data_time.get(&instrument).copied().or(self.latest)?;
        let lagging_partner = self
            .pairs
            .iter()
            .filter_map(|pair| {
                if pair.spot == instrument {
                    Some(pair.futures)
                } else if pair.futures == instrument {
                    Some(pair.spot)
                } else {
                    None
                }
            })
            .filter_map(|partner| self.data_time.get(&partner).copied())
            .filter(|partner| *partner < own && own - *partner <= self.late_retention)
            .min();

        lagging_partner
            .unwrap_or(own)
            .checked_sub_signed(self.late_retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bar::test_utils::{bar, minute},
        config::PipelineConfig,
        store::InMemoryStore,
    };
    use std::sync::Arc;

    const SPOT: InstrumentId = InstrumentId(1);
    const FUTURES: InstrumentId = InstrumentId(2);

    fn flat(index: i64, price: &str) -> Bar {
        bar(minute(index), [price; 4], "1", 1)
    }

    fn derived_worker() -> (DerivedWorker, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let (failures, _) = mpsc::unbounded_channel();
        let ctx = Context {
            config: Arc::new(
                PipelineConfig::default().with_premium_pair(PremiumPair::new(SPOT, FUTURES)),
            ),
            store: store.clone(),
            failures,
        };
        (DerivedWorker::new(ctx), store)
    }

    #[tokio::test]
    async fn test_idle_premium_leg_does_not_pin_closes() {
        let (mut worker, store) = derived_worker();

        worker.on_closed(FUTURES, Resolution::OneMin, flat(0, "101")).await;
        for index in 0..2000 {
            worker.on_closed(SPOT, Resolution::OneMin, flat(index, "100")).await;
        }

        // 15 minutes of spot history plus the idle leg's only close
        assert_eq!(worker.closes.len(), 17);
        assert_eq!(store.premium_index_count(), 1);
    }

    #[tokio::test]
    async fn test_lagging_premium_leg_within_retention_still_pairs() {
        let (mut worker, store) = derived_worker();

        for index in 0..30 {
            worker.on_closed(SPOT, Resolution::OneMin, flat(index, "100")).await;
            if index >= 10 {
                worker.on_closed(FUTURES, Resolution::OneMin, flat(index - 10, "101")).await;
            }
        }
        for index in 20..30 {
            worker.on_closed(FUTURES, Resolution::OneMin, flat(index, "101")).await;
        }

        assert_eq!(store.premium_index_count(), 30);
        assert!(worker.closes.len() < 60);
    }
}
