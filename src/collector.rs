//! Periodic collect-and-flush loop.
//!
//! The driver (the task calling [`Collector::run`]) ticks on a fixed cadence
//! and posts [`Tick`]s on a bounded channel. A spawned consumer owns the feed
//! and the [`Accumulator`]: for every `Collect` it fetches one snapshot,
//! appends it and flushes when the tick count reaches the threshold. `Stop`
//! makes it write any partial buffer and exit.
//!
//! The consumer also watches the shutdown handle: once it fires, queued
//! ticks are discarded, so at most the fetch already in flight completes
//! after a stop request.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, error, info, warn};

use crate::accumulator::Accumulator;
use crate::feed::{FetchError, StationFeed};
use crate::shutdown::ShutdownHandle;

const TICK_QUEUE_CAPACITY: usize = 1;

/// Collector settings.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory under which `Available Bikes/` and `Available eBikes/` are created.
    pub result_root: PathBuf,
    /// Snapshots per output file.
    pub rows_per_file: u32,
    /// Wait between two collections.
    pub interval: Duration,
    /// Total run time; `None` runs until shut down.
    pub max_duration: Option<Duration>,
    /// Number of the first output file.
    pub start_index: u32,
    /// Consecutive failed fetches after which the run aborts; 0 never aborts.
    pub max_consecutive_failures: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            result_root: PathBuf::from("Sniffer Data"),
            rows_per_file: 4,
            interval: Duration::from_secs(20),
            max_duration: None,
            start_index: 1,
            max_consecutive_failures: 0,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rows_per_file == 0 {
            bail!("rows_per_file must be at least 1");
        }
        if self.max_duration == Some(Duration::ZERO) {
            bail!("max_duration must be positive, use None for an unbounded run");
        }
        Ok(())
    }
}

/// Counters shared between the consumer and the driver's progress logs.
#[derive(Debug, Default)]
pub struct CollectorStats {
    pub snapshots: AtomicU64,
    pub failed_fetches: AtomicU64,
    pub files_written: AtomicU32,
    pub buffered_rows: AtomicUsize,
}

/// Message from the driver to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Collect one snapshot; the value counts snapshots since the last flush.
    Collect(u32),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Shutdown,
    ConsumerExited,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: StopReason,
    pub elapsed: Duration,
    pub snapshots: u64,
    pub failed_fetches: u64,
    pub files_written: u32,
}

pub struct Collector<F> {
    feed: F,
    accumulator: Accumulator,
    config: CollectorConfig,
    stats: Arc<CollectorStats>,
}

impl<F: StationFeed + 'static> Collector<F> {
    /// Validates `config`, performs the initial fetch that fixes the output
    /// column schema and creates the output directories.
    pub async fn new(feed: F, config: CollectorConfig) -> Result<Self> {
        config.validate()?;

        let schema = feed
            .fetch_snapshot()
            .await
            .context("initial fetch for the station schema failed")?;
        info!(
            stations = schema.station_count(),
            updated_at = %schema.updated_at,
            "Station schema captured"
        );

        let accumulator = Accumulator::new(
            config.result_root.clone(),
            config.rows_per_file,
            config.start_index,
            &schema,
        )?;

        Ok(Self {
            feed,
            accumulator,
            config,
            stats: Arc::new(CollectorStats::default()),
        })
    }

    /// Runs until the duration bound, a shutdown or a consumer failure, then
    /// writes the partial buffer and returns.
    pub async fn run(self, mut shutdown: ShutdownHandle) -> Result<RunSummary> {
        let Collector {
            feed,
            accumulator,
            config,
            stats,
        } = self;

        let (tx, rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
        let consumer = tokio::spawn(
            consume(
                feed,
                accumulator,
                rx,
                shutdown.clone(),
                Arc::clone(&stats),
                config.max_consecutive_failures,
            )
            .instrument(tracing::info_span!("consumer")),
        );

        info!(
            result_root = %config.result_root.display(),
            rows_per_file = config.rows_per_file,
            interval_secs = config.interval.as_secs_f64(),
            max_duration_secs = config.max_duration.map(|d| d.as_secs()),
            "Starting collection"
        );

        let start = Instant::now();
        let mut count = 0u32;

        let reason = loop {
            count += 1;

            tokio::select! {
                biased;
                sent = tx.send(Tick::Collect(count)) => {
                    if sent.is_err() {
                        break StopReason::ConsumerExited;
                    }
                }
                _ = shutdown.wait_for_shutdown() => break StopReason::Shutdown,
            }

            let elapsed = start.elapsed();
            info!(
                elapsed = %format_elapsed(elapsed),
                files = stats.files_written.load(Ordering::Relaxed),
                rows = count,
                buffered = stats.buffered_rows.load(Ordering::Relaxed),
                "Snapshot requested"
            );

            if count == config.rows_per_file {
                count = 0;
            }

            if let Some(max) = config.max_duration {
                info!(remaining_secs = max.saturating_sub(elapsed).as_secs(), "Remaining time");
                if elapsed > max {
                    break StopReason::DurationElapsed;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = shutdown.wait_for_shutdown() => break StopReason::Shutdown,
            }
        };

        info!(?reason, "Stopping collection");
        // fails only if the consumer is already gone, including when it
        // stopped on the shutdown handle itself
        let _ = tx.send(Tick::Stop).await;
        drop(tx);

        consumer.await.context("consumer task panicked")??;

        let summary = RunSummary {
            reason,
            elapsed: start.elapsed(),
            snapshots: stats.snapshots.load(Ordering::Relaxed),
            failed_fetches: stats.failed_fetches.load(Ordering::Relaxed),
            files_written: stats.files_written.load(Ordering::Relaxed),
        };
        info!(
            elapsed = %format_elapsed(summary.elapsed),
            snapshots = summary.snapshots,
            failed_fetches = summary.failed_fetches,
            files = summary.files_written,
            "Collector stopped"
        );
        Ok(summary)
    }
}

async fn consume<F: StationFeed>(
    feed: F,
    mut accumulator: Accumulator,
    mut rx: mpsc::Receiver<Tick>,
    mut shutdown: ShutdownHandle,
    stats: Arc<CollectorStats>,
    max_consecutive_failures: u32,
) -> Result<()> {
    let mut consecutive_failures = 0u32;

    loop {
        let tick = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => {
                info!("Shutdown observed, discarding queued ticks");
                break;
            }
            tick = rx.recv() => tick,
        };
        let count = match tick {
            Some(Tick::Collect(count)) => count,
            Some(Tick::Stop) | None => break,
        };

        match feed.fetch_snapshot().await {
            Ok(snapshot) => {
                consecutive_failures = 0;
                stats.snapshots.fetch_add(1, Ordering::Relaxed);
                accumulator.accumulate(snapshot);
            }
            Err(e) => {
                consecutive_failures += 1;
                stats.failed_fetches.fetch_add(1, Ordering::Relaxed);
                match &e {
                    FetchError::Network(_) => {
                        warn!(error = %e, consecutive_failures, "Fetch failed, skipping tick")
                    }
                    FetchError::Malformed(_) => {
                        error!(error = %e, consecutive_failures, "Fetch failed, skipping tick")
                    }
                }

                if max_consecutive_failures > 0 && consecutive_failures >= max_consecutive_failures
                {
                    finish(&mut accumulator, &stats)?;
                    bail!("giving up after {consecutive_failures} consecutive failed fetches: {e}");
                }
            }
        }

        if accumulator.maybe_flush(count)?.is_some() {
            stats
                .files_written
                .store(accumulator.files_written(), Ordering::Relaxed);
        }
        stats
            .buffered_rows
            .store(accumulator.buffered_rows(), Ordering::Relaxed);
    }

    finish(&mut accumulator, &stats)?;
    info!("Consumer stopped");
    Ok(())
}

fn finish(accumulator: &mut Accumulator, stats: &CollectorStats) -> Result<()> {
    accumulator.finish()?;
    stats
        .files_written
        .store(accumulator.files_written(), Ordering::Relaxed);
    stats.buffered_rows.store(0, Ordering::Relaxed);
    Ok(())
}

/// Formats a duration as `H:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
