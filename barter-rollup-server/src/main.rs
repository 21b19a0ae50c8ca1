use barter_rollup::{
    Exchange, Input, InMemoryStore, Instrument, PipelineConfig, ShutdownMode, spawn_pipeline,
};
use chrono::Utc;
use serde::Deserialize;
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::interval,
};
use tracing::{debug, error, info, warn};

/// Seconds between wall-clock ticks used to resolve deferred windows.
const DEFAULT_TICK_SECS: u64 = 5;

/// Server configuration file: pipeline settings plus the instrument registry.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerConfig {
    #[serde(flatten)]
    pipeline: PipelineConfig,
    exchanges: Vec<Exchange>,
    instruments: Vec<Instrument>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting barter-rollup server");

    let config = match load_config() {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load configuration: {}", error);
            std::process::exit(1);
        }
    };

    // Configurable via ROLLUP_TICK_SECS env var (default: 5)
    let tick_secs = env_parse("ROLLUP_TICK_SECS").unwrap_or(DEFAULT_TICK_SECS).max(1);
    info!(
        gap_tolerance = config.pipeline.gap.gap_tolerance,
        max_wait_secs = config.pipeline.gap.max_wait.as_secs(),
        buffer_size = config.pipeline.channel_buffer_size,
        tick_secs,
        instruments = config.instruments.len(),
        "Configuration loaded"
    );

    let store = Arc::new(
        InMemoryStore::new().with_instruments(config.exchanges, config.instruments),
    );
    let mut pipeline = spawn_pipeline(config.pipeline, store.clone()).await;

    let reporter = pipeline.take_failures().map(|mut failures| {
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                warn!(
                    instrument = %failure.instrument,
                    resolution = %failure.resolution,
                    epoch = %failure.epoch,
                    kind = ?failure.kind,
                    "Window failure"
                );
            }
        })
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = interval(Duration::from_secs(tick_secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Input>(&line) {
                        Ok(input) => {
                            if pipeline.send(input).await.is_err() {
                                error!("Pipeline stopped accepting input");
                                break;
                            }
                        }
                        Err(error) => {
                            // Don't spam logs with the full record
                            let preview = line.chars().take(100).collect::<String>();
                            warn!("Failed to parse input: {} - {}", error, preview);
                        }
                    }
                }
                Ok(None) => {
                    info!("Input stream closed");
                    break;
                }
                Err(error) => {
                    error!("Failed to read input: {}", error);
                    break;
                }
            },
            _ = ticker.tick() => {
                debug!("Tick");
                if pipeline.send(Input::Tick { time: Utc::now() }).await.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, flushing open windows");
                break;
            }
        }
    }

    pipeline.shutdown(ShutdownMode::Flush).await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    info!(
        base_bars = store.base_bar_count(),
        rollup_bars = store.rollup_bar_count(),
        curve_snapshots = store.curve_snapshot_count(),
        premium_indices = store.premium_index_count(),
        "barter-rollup server stopped"
    );
}

/// Load the optional `ROLLUP_CONFIG` JSON file, then apply env var overrides.
fn load_config() -> Result<ServerConfig, String> {
    let mut config = match std::env::var("ROLLUP_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|error| format!("cannot read {path}: {error}"))?;
            serde_json::from_str::<ServerConfig>(&text)
                .map_err(|error| format!("invalid config {path}: {error}"))?
        }
        Err(_) => ServerConfig::default(),
    };

    if let Some(tolerance) = env_parse("ROLLUP_GAP_TOLERANCE") {
        config.pipeline.gap = config.pipeline.gap.with_gap_tolerance(tolerance);
    }
    if let Some(secs) = env_parse("ROLLUP_MAX_WAIT_SECS") {
        config.pipeline.gap = config.pipeline.gap.with_max_wait(Duration::from_secs(secs));
    }
    if let Some(size) = env_parse("ROLLUP_BUFFER_SIZE") {
        config.pipeline = config.pipeline.with_channel_buffer_size(size);
    }

    Ok(config)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use barter_rollup::{InstrumentId, PremiumPair};

    #[test]
    fn test_example_config_parses() {
        let config: ServerConfig =
            serde_json::from_str(include_str!("../config.example.json")).unwrap();

        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.instruments[1].name, "BINANCE:BTCUSDT.P");
        assert_eq!(
            config.pipeline.premium_pairs,
            vec![PremiumPair::new(InstrumentId(1), InstrumentId(2))]
        );
        assert_eq!(config.pipeline.late_retention, Duration::from_secs(900));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();

        assert!(config.instruments.is_empty());
        assert_eq!(config.pipeline, PipelineConfig::default());
    }
}
