use super::{
    Context, Failure, FailureKind, ShutdownMode,
    derived::DerivedMsg,
    window::{StreamAggregator, StreamEvent},
};
use crate::{
    bar::{Bar, BaseBar, Completeness, RollupBar},
    error::RollupError,
    gap::GapPolicy,
    instrument::InstrumentId,
    resolution::Resolution,
};
use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// Closed bar of the finer rung with the completeness it was emitted with.
    SubBar(Bar, Completeness),
    Tick(DateTime<Utc>),
    Shutdown(ShutdownMode),
}

/// Spawn one worker per ladder rung for `instrument`, each feeding the next coarser rung.
///
/// Returns the sender into the base worker and every worker's task handle.
pub(crate) fn spawn_chain(
    instrument: InstrumentId,
    ctx: &Context,
    derived: mpsc::Sender<DerivedMsg>,
) -> (mpsc::Sender<WorkerMsg>, Vec<JoinHandle<()>>) {
    let buffer = ctx.config.channel_buffer_size.max(1);
    let (senders, receivers): (Vec<mpsc::Sender<WorkerMsg>>, Vec<_>) = Resolution::LADDER
        .iter()
        .map(|_| mpsc::channel(buffer))
        .unzip();

    let handles = Resolution::LADDER
        .into_iter()
        .zip(receivers)
        .enumerate()
        .map(|(rung, (resolution, rx))| {
            let worker = Worker {
                instrument,
                resolution,
                stream: StreamAggregator::new(
                    instrument,
                    resolution,
                    ctx.config.field_dimension.clone(),
                    GapPolicy::new(ctx.config.gap),
                    ctx.config.precision,
                    ctx.config.late_retention,
                ),
                ctx: ctx.clone(),
                next: senders.get(rung + 1).cloned(),
                derived: derived.clone(),
            };
            tokio::spawn(worker.run(rx))
        })
        .collect();

    (senders[0].clone(), handles)
}

/// One rung of an instrument's aggregation chain.
///
/// The base rung carries no [`StreamAggregator`]: it persists ingested bars and passes them on.
struct Worker {
    instrument: InstrumentId,
    resolution: Resolution,
    stream: Option<StreamAggregator>,
    ctx: Context,
    next: Option<mpsc::Sender<WorkerMsg>>,
    derived: mpsc::Sender<DerivedMsg>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMsg>) {
        debug!(instrument = %self.instrument, resolution = %self.resolution, "worker started");

        let mode = loop {
            match rx.recv().await {
                Some(WorkerMsg::SubBar(bar, completeness)) => {
                    self.on_sub_bar(bar, completeness).await
                }
                Some(WorkerMsg::Tick(time)) => self.on_tick(time).await,
                Some(WorkerMsg::Shutdown(mode)) => break mode,
                None => break ShutdownMode::Flush,
            }
        };

        if mode == ShutdownMode::Flush {
            if let Some(stream) = self.stream.as_mut() {
                let events = stream.flush();
                self.handle(events).await;
            }
        }
        self.forward(WorkerMsg::Shutdown(mode)).await;

        debug!(
            instrument = %self.instrument,
            resolution = %self.resolution,
            tracked = self.stream.as_ref().map_or(0, StreamAggregator::tracked),
            "worker stopped"
        );
    }

    async fn on_sub_bar(&mut self, bar: Bar, completeness: Completeness) {
        match self.stream.as_mut() {
            Some(stream) => {
                let events = stream.on_sub_bar(bar, completeness);
                self.handle(events).await;
            }
            None => self.on_base_bar(bar).await,
        }
    }

    async fn on_base_bar(&mut self, bar: Bar) {
        let checked = bar.validate().and_then(|_| {
            if self.resolution.is_aligned(bar.epoch) {
                Ok(())
            } else {
                Err(RollupError::OutOfWindow {
                    resolution: self.resolution,
                    window_start: self.resolution.window_start(bar.epoch),
                    epoch: bar.epoch,
                })
            }
        });
        if let Err(error) = checked {
            warn!(instrument = %self.instrument, epoch = %bar.epoch, %error, "rejecting base bar");
            self.ctx.fail(Failure {
                instrument: self.instrument,
                resolution: self.resolution,
                epoch: bar.epoch,
                kind: FailureKind::InvalidInput(error),
            });
            return;
        }

        let base = BaseBar {
            instrument: self.instrument,
            bar,
        };
        self.ctx
            .persist("base_bar", (self.instrument, self.resolution, base.bar.epoch), || {
                self.ctx.store.upsert_base_bar(&base)
            })
            .await;

        self.publish(base.bar, Completeness::Complete).await;
    }

    async fn on_tick(&mut self, time: DateTime<Utc>) {
        if let Some(stream) = self.stream.as_mut() {
            let events = stream.on_tick(time);
            self.handle(events).await;
        }
        self.forward(WorkerMsg::Tick(time)).await;
    }

    async fn handle(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            match event {
                StreamEvent::Emitted(rollup) | StreamEvent::Reemitted(rollup) => {
                    self.on_rollup(rollup).await
                }
                StreamEvent::Dropped { .. } => {}
                StreamEvent::Failed { window, error } => {
                    error!(
                        instrument = %self.instrument,
                        %window,
                        %error,
                        "window failed"
                    );
                    self.ctx.fail(Failure {
                        instrument: self.instrument,
                        resolution: window.resolution,
                        epoch: window.start,
                        kind: FailureKind::Aggregation(error),
                    });
                }
                StreamEvent::Late { window, .. } => {
                    self.ctx.fail(Failure {
                        instrument: self.instrument,
                        resolution: window.resolution,
                        epoch: window.start,
                        kind: FailureKind::LateData,
                    });
                }
            }
        }
    }

    async fn on_rollup(&mut self, rollup: RollupBar) {
        self.ctx
            .persist(
                "rollup_bar",
                (rollup.instrument, rollup.resolution, rollup.bar.epoch),
                || self.ctx.store.upsert_rollup_bar(&rollup),
            )
            .await;

        self.publish(rollup.bar, rollup.completeness).await;
    }

    /// Hand a closed bar to the derived task and the next rung.
    async fn publish(&mut self, bar: Bar, completeness: Completeness) {
        let closed = DerivedMsg::Closed {
            instrument: self.instrument,
            resolution: self.resolution,
            bar: bar.clone(),
        };
        if self.derived.send(closed).await.is_err() {
            warn!(instrument = %self.instrument, "derived task closed");
        }
        self.forward(WorkerMsg::SubBar(bar, completeness)).await;
    }

    async fn forward(&mut self, msg: WorkerMsg) {
        if let Some(next) = &self.next {
            if next.send(msg).await.is_err() {
                warn!(
                    instrument = %self.instrument,
                    resolution = %self.resolution,
                    "next worker closed"
                );
                self.next = None;
            }
        }
    }
}
