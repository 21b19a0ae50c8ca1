//! Barter-Rollup
//!
//! Market data aggregation engine. Rolls finest-resolution OHLCV bars up a fixed ladder of
//! coarser resolutions (5Min, 15Min, 30Min, 1H, 4H, 1D) using exact decimal arithmetic, and
//! derives fixed-width term-structure snapshots and spot/futures premium indices per window.
//!
//! Core building blocks:
//! - [`DecimalValue`]: exact decimal with configurable [`Precision`].
//! - [`Resolution`] and [`Window`]: the resolution ladder and epoch-aligned windows.
//! - [`aggregate`]: the pure OHLCV fold.
//! - [`GapPolicy`]: emit, defer, force or drop windows with missing sub-bars.
//! - [`CurveBuilder`] and [`compute_premium`]: derived per-window outputs.
//! - [`spawn_pipeline`]: streaming pipeline with per (instrument, resolution) workers.

/// Exact decimal values and arithmetic limits.
pub mod decimal;

/// All [`Error`](std::error::Error)s generated in Barter-Rollup.
pub mod error;

/// Resolution ladder and epoch-aligned windows.
pub mod resolution;

/// Instrument, exchange and field dimension identifiers.
pub mod instrument;

/// OHLCV bars, rollups and their storage keys.
pub mod bar;

/// OHLCV fold of sub-bars into a coarser bar.
pub mod aggregator;

/// Missing sub-bar handling.
pub mod gap;

/// Term-structure snapshots.
pub mod curve;

/// Spot/futures premium index.
pub mod premium;

/// Storage collaborator boundary and in-memory implementation.
pub mod store;

/// Backoff for idempotent storage writes.
pub mod retry;

/// Pipeline configuration.
pub mod config;

/// Streaming aggregation pipeline.
pub mod pipeline;

pub use aggregator::{BarFold, aggregate};
pub use bar::{Bar, BaseBar, Completeness, RollupBar};
pub use config::PipelineConfig;
pub use curve::{CurveBuilder, CurveSnapshot, TENOR_SLOTS, TenorObservation, TenorPoint};
pub use decimal::{DecimalValue, Precision};
pub use error::{RollupError, StoreError};
pub use gap::{EmptyWindow, GapDecision, GapPolicy, GapPolicyConfig, TimeoutAction};
pub use instrument::{Exchange, ExchangeId, FieldDimension, Instrument, InstrumentId};
pub use pipeline::{Failure, FailureKind, Input, PipelineHandle, ShutdownMode, spawn_pipeline};
pub use premium::{PremiumIndex, PremiumPair, compute_premium};
pub use resolution::{Resolution, Window};
pub use retry::RetryPolicy;
pub use store::{InMemoryStore, Store};
