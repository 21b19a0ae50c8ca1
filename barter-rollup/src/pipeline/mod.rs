//! Streaming aggregation pipeline.
//!
//! Ingested base bars fan out to one task chain per instrument: a base worker persists the 1Min
//! bar, then one worker per coarser resolution folds its sub-bars into rollups and feeds the next
//! rung. Every closed bar is also forwarded to a single derived task that builds curve snapshots
//! and premium indices.

use crate::{
    bar::{BaseBar, Completeness},
    config::PipelineConfig,
    curve::TenorObservation,
    error::{RollupError, StoreError},
    instrument::InstrumentId,
    premium::PremiumPair,
    resolution::Resolution,
    store::Store,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use self::{
    derived::{DerivedMsg, DerivedWorker},
    worker::WorkerMsg,
};

pub mod window;

mod derived;
mod worker;

/// Pipeline input as delivered by ingestion.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Bar(BaseBar),
    Tenor(TenorObservation),
    /// Wall-clock or logical time used to resolve deferred windows.
    Tick { time: DateTime<Utc> },
}

/// How in-flight windows are treated on shutdown.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Resolve every outstanding window under the timeout policy before stopping.
    #[default]
    Flush,
    /// Stop without emitting outstanding windows.
    Abandon,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FailureKind {
    /// Aggregation or derivation of a window failed.
    Aggregation(RollupError),
    /// Persisting a record failed after exhausting retries.
    Storage(StoreError),
    /// Ingested record was rejected before aggregation.
    InvalidInput(RollupError),
    /// Sub-bar arrived after its window was evicted.
    LateData,
}

/// Window-scoped failure surfaced to the operator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Failure {
    pub instrument: InstrumentId,
    pub resolution: Resolution,
    pub epoch: DateTime<Utc>,
    pub kind: FailureKind,
}

/// Shared, read-only state handed to every pipeline task.
#[derive(Clone)]
pub(crate) struct Context {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<dyn Store>,
    failures: mpsc::UnboundedSender<Failure>,
}

impl Context {
    pub fn fail(&self, failure: Failure) {
        if self.failures.send(failure).is_err() {
            debug!("failure receiver dropped");
        }
    }

    /// Run an idempotent write under the configured [`RetryPolicy`](crate::retry::RetryPolicy).
    ///
    /// Returns `false` once retries are exhausted, after surfacing a [`Failure`].
    pub async fn persist<F, Fut>(
        &self,
        record: &'static str,
        origin: (InstrumentId, Resolution, DateTime<Utc>),
        mut write: F,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let (instrument, resolution, epoch) = origin;
        let result = self
            .config
            .retry
            .retry_async(
                |attempt| {
                    if attempt > 0 {
                        warn!(record, %instrument, %resolution, %epoch, attempt, "retrying write");
                    }
                    write()
                },
                StoreError::is_transient,
            )
            .await;

        match result {
            Ok(()) => true,
            Err(error) => {
                error!(
                    record,
                    %instrument,
                    %resolution,
                    %epoch,
                    %error,
                    "giving up on write"
                );
                self.fail(Failure {
                    instrument,
                    resolution,
                    epoch,
                    kind: FailureKind::Storage(error),
                });
                false
            }
        }
    }
}

#[derive(Debug)]
enum RouterMsg {
    Input(Input),
    Shutdown(ShutdownMode),
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    tx: mpsc::Sender<RouterMsg>,
    failures: Option<mpsc::UnboundedReceiver<Failure>>,
    router: JoinHandle<()>,
}

impl PipelineHandle {
    /// Submit an input, waiting for channel capacity.
    pub async fn send(&self, input: Input) -> Result<(), RollupError> {
        self.tx
            .send(RouterMsg::Input(input))
            .await
            .map_err(|_| RollupError::PipelineClosed)
    }

    /// Take the failure receiver. Returns `None` if already taken.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<Failure>> {
        self.failures.take()
    }

    /// Stop the pipeline and wait for every task to finish.
    pub async fn shutdown(self, mode: ShutdownMode) {
        info!(?mode, "pipeline shutting down");
        if self.tx.send(RouterMsg::Shutdown(mode)).await.is_err() {
            warn!("pipeline router already stopped");
        }
        if let Err(error) = self.router.await {
            error!(%error, "pipeline router panicked");
        }
    }
}

/// Start the pipeline.
///
/// Configured premium pairs are checked against the instrument registry first. A pair that
/// cannot be loaded or fails validation is logged and skipped.
pub async fn spawn_pipeline(mut config: PipelineConfig, store: Arc<dyn Store>) -> PipelineHandle {
    let mut pairs = Vec::with_capacity(config.premium_pairs.len());
    for pair in std::mem::take(&mut config.premium_pairs) {
        match validate_pair(pair, store.as_ref()).await {
            Ok(()) => pairs.push(pair),
            Err(error) => {
                warn!(spot = %pair.spot, futures = %pair.futures, %error, "skipping premium pair")
            }
        }
    }
    config.premium_pairs = pairs;

    let buffer = config.channel_buffer_size.max(1);
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    let ctx = Context {
        config: Arc::new(config),
        store,
        failures: failures_tx,
    };

    let (derived_tx, derived_rx) = mpsc::channel(buffer);
    let derived = tokio::spawn(DerivedWorker::new(ctx.clone()).run(derived_rx));

    let (tx, rx) = mpsc::channel(buffer);
    let router = tokio::spawn(route(ctx, rx, derived_tx, derived));

    PipelineHandle {
        tx,
        failures: Some(failures_rx),
        router,
    }
}

async fn validate_pair(pair: PremiumPair, store: &dyn Store) -> Result<(), RollupError> {
    let spot = store.load_instrument(pair.spot).await?;
    let futures = store.load_instrument(pair.futures).await?;
    pair.validate(&spot, &futures)?;
    info!(spot = %spot.name, futures = %futures.name, "premium pair configured");
    Ok(())
}

async fn route(
    ctx: Context,
    mut rx: mpsc::Receiver<RouterMsg>,
    derived_tx: mpsc::Sender<DerivedMsg>,
    derived: JoinHandle<()>,
) {
    let mut chains: FnvHashMap<InstrumentId, mpsc::Sender<WorkerMsg>> = FnvHashMap::default();
    let mut workers = Vec::new();

    let mode = loop {
        match rx.recv().await {
            Some(RouterMsg::Input(Input::Bar(base))) => {
                let chain = chains.entry(base.instrument).or_insert_with(|| {
                    info!(instrument = %base.instrument, "starting aggregation chain");
                    let (tx, handles) =
                        worker::spawn_chain(base.instrument, &ctx, derived_tx.clone());
                    workers.extend(handles);
                    tx
                });
                let sub_bar = WorkerMsg::SubBar(base.bar, Completeness::Complete);
                if chain.send(sub_bar).await.is_err() {
                    warn!(instrument = %base.instrument, "aggregation chain closed");
                }
            }
            Some(RouterMsg::Input(Input::Tenor(observation))) => {
                if derived_tx.send(DerivedMsg::Tenor(observation)).await.is_err() {
                    warn!("derived task closed");
                }
            }
            Some(RouterMsg::Input(Input::Tick { time })) => {
                for chain in chains.values() {
                    let _ = chain.send(WorkerMsg::Tick(time)).await;
                }
            }
            Some(RouterMsg::Shutdown(mode)) => break mode,
            None => break ShutdownMode::Flush,
        }
    };

    for chain in chains.values() {
        let _ = chain.send(WorkerMsg::Shutdown(mode)).await;
    }
    drop(chains);
    for result in futures::future::join_all(workers).await {
        if let Err(error) = result {
            error!(%error, "aggregation worker panicked");
        }
    }

    let _ = derived_tx.send(DerivedMsg::Shutdown(mode)).await;
    drop(derived_tx);
    if let Err(error) = derived.await {
        error!(%error, "derived worker panicked");
    }
    info!(?mode, "pipeline stopped");
}
