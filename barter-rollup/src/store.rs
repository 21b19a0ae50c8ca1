//! Storage collaborator boundary.
//!
//! Every upsert is keyed by the full entity key, so replaying a write leaves the stored state
//! unchanged. The pipeline relies on this to retry failed writes.

use crate::{
    bar::{BaseBar, BaseBarKey, RollupBar, RollupKey},
    curve::{CurveKey, CurveSnapshot},
    error::StoreError,
    instrument::{Exchange, ExchangeId, Instrument, InstrumentId},
    premium::{PremiumIndex, PremiumKey},
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Persistence operations the pipeline consumes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_instrument(&self, id: InstrumentId) -> Result<Instrument, StoreError>;

    async fn load_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError>;

    async fn upsert_base_bar(&self, bar: &BaseBar) -> Result<(), StoreError>;

    async fn upsert_rollup_bar(&self, bar: &RollupBar) -> Result<(), StoreError>;

    async fn upsert_curve_snapshot(&self, snapshot: &CurveSnapshot) -> Result<(), StoreError>;

    async fn upsert_premium_index(&self, premium: &PremiumIndex) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn load_instrument(&self, id: InstrumentId) -> Result<Instrument, StoreError> {
        (**self).load_instrument(id).await
    }

    async fn load_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        (**self).load_exchange(id).await
    }

    async fn upsert_base_bar(&self, bar: &BaseBar) -> Result<(), StoreError> {
        (**self).upsert_base_bar(bar).await
    }

    async fn upsert_rollup_bar(&self, bar: &RollupBar) -> Result<(), StoreError> {
        (**self).upsert_rollup_bar(bar).await
    }

    async fn upsert_curve_snapshot(&self, snapshot: &CurveSnapshot) -> Result<(), StoreError> {
        (**self).upsert_curve_snapshot(snapshot).await
    }

    async fn upsert_premium_index(&self, premium: &PremiumIndex) -> Result<(), StoreError> {
        (**self).upsert_premium_index(premium).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    instruments: FnvHashMap<InstrumentId, Instrument>,
    exchanges: FnvHashMap<ExchangeId, Exchange>,
    base_bars: FnvHashMap<BaseBarKey, BaseBar>,
    rollup_bars: FnvHashMap<RollupKey, RollupBar>,
    curve_snapshots: FnvHashMap<CurveKey, CurveSnapshot>,
    premium_indices: FnvHashMap<PremiumKey, PremiumIndex>,
}

/// In-memory [`Store`] with keyed read access for downstream consumers.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruments<I>(self, exchanges: Vec<Exchange>, instruments: I) -> Self
    where
        I: IntoIterator<Item = Instrument>,
    {
        {
            let mut tables = self.tables.write();
            tables
                .exchanges
                .extend(exchanges.into_iter().map(|exchange| (exchange.id, exchange)));
            tables.instruments.extend(
                instruments
                    .into_iter()
                    .map(|instrument| (instrument.id, instrument)),
            );
        }
        self
    }

    pub fn base_bar(&self, key: &BaseBarKey) -> Option<BaseBar> {
        self.tables.read().base_bars.get(key).cloned()
    }

    pub fn rollup_bar(&self, key: &RollupKey) -> Option<RollupBar> {
        self.tables.read().rollup_bars.get(key).cloned()
    }

    pub fn curve_snapshot(&self, key: &CurveKey) -> Option<CurveSnapshot> {
        self.tables.read().curve_snapshots.get(key).cloned()
    }

    pub fn premium_index(&self, key: &PremiumKey) -> Option<PremiumIndex> {
        self.tables.read().premium_indices.get(key).copied()
    }

    /// Every stored rollup bar, sorted by key.
    pub fn rollup_bars(&self) -> Vec<RollupBar> {
        let mut bars = self
            .tables
            .read()
            .rollup_bars
            .values()
            .cloned()
            .collect::<Vec<_>>();
        bars.sort_by_key(RollupBar::key);
        bars
    }

    pub fn base_bar_count(&self) -> usize {
        self.tables.read().base_bars.len()
    }

    pub fn rollup_bar_count(&self) -> usize {
        self.tables.read().rollup_bars.len()
    }

    pub fn curve_snapshot_count(&self) -> usize {
        self.tables.read().curve_snapshots.len()
    }

    pub fn premium_index_count(&self) -> usize {
        self.tables.read().premium_indices.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_instrument(&self, id: InstrumentId) -> Result<Instrument, StoreError> {
        self.tables
            .read()
            .instruments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "instrument".to_string(),
                id: id.0,
            })
    }

    async fn load_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        self.tables
            .read()
            .exchanges
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "exchange".to_string(),
                id: id.0,
            })
    }

    async fn upsert_base_bar(&self, bar: &BaseBar) -> Result<(), StoreError> {
        self.tables.write().base_bars.insert(bar.key(), bar.clone());
        Ok(())
    }

    async fn upsert_rollup_bar(&self, bar: &RollupBar) -> Result<(), StoreError> {
        self.tables.write().rollup_bars.insert(bar.key(), bar.clone());
        Ok(())
    }

    async fn upsert_curve_snapshot(&self, snapshot: &CurveSnapshot) -> Result<(), StoreError> {
        self.tables
            .write()
            .curve_snapshots
            .insert(snapshot.key(), snapshot.clone());
        Ok(())
    }

    async fn upsert_premium_index(&self, premium: &PremiumIndex) -> Result<(), StoreError> {
        self.tables
            .write()
            .premium_indices
            .insert(premium.key(), *premium);
        Ok(())
    }
}
