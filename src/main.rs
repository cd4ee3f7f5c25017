//! CLI entry point for the Bixi sniffer.
//!
//! Provides subcommands for collecting station-status snapshots into CSV
//! files, fetching a single snapshot, and counting historical trips per
//! station.

use anyhow::{Context, Result};
use bixi_sniffer::accumulator::Accumulator;
use bixi_sniffer::collector::{Collector, CollectorConfig};
use bixi_sniffer::feed::{DEFAULT_STATION_STATUS_URL, GbfsFeed, StationFeed};
use bixi_sniffer::fetch::BasicClient;
use bixi_sniffer::output::{write_json, write_records};
use bixi_sniffer::shutdown::{Shutdown, trap_ctrl_c};
use bixi_sniffer::trips::{
    DateRange, count_departures, filter_by_date, load_stations, load_trips, station_counts,
};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bixi_sniffer")]
#[command(about = "Collects bike-share station status and analyzes trip history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the station-status feed and write periodic snapshot CSVs
    Collect {
        /// Feed URL or local file (defaults to $BIXI_STATION_STATUS_URL, then the Bixi feed)
        #[arg(long)]
        url: Option<String>,

        /// Directory receiving the "Available Bikes" and "Available eBikes" folders
        #[arg(short, long, default_value = "Sniffer Data")]
        result_root: PathBuf,

        /// Snapshots per output file
        #[arg(short = 'n', long, default_value_t = 4)]
        rows_per_file: u32,

        /// Seconds between two collections
        #[arg(short, long, default_value_t = 20)]
        interval: u64,

        /// Total collection time in seconds (0 or negative = until Ctrl+C)
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        duration: i64,

        /// Number of the first output file
        #[arg(long, default_value_t = 1)]
        start_index: u32,

        /// IANA time zone for timestamps
        #[arg(long, default_value = "America/Montreal")]
        timezone: String,

        /// HTTP request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Abort after this many consecutive failed fetches (0 = never)
        #[arg(long, default_value_t = 0)]
        max_failures: u32,
    },
    /// Fetch a single snapshot and optionally write it as one file pair
    Snapshot {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,

        /// Write the snapshot under this result root
        #[arg(short, long)]
        result_root: Option<PathBuf>,

        /// Number of the written file pair
        #[arg(long, default_value_t = 1)]
        index: u32,

        /// IANA time zone for timestamps
        #[arg(long, default_value = "America/Montreal")]
        timezone: String,

        /// HTTP request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Count historical trips per origin station over a range of months
    StationCounts {
        /// Trip export CSV (start_date, emplacement_pk_start, ...)
        #[arg(long)]
        trips: PathBuf,

        /// Station list CSV (pk, name, latitude, longitude)
        #[arg(long)]
        stations: PathBuf,

        #[arg(long, default_value_t = 2021)]
        year: i32,

        /// First month, inclusive
        #[arg(long, default_value_t = 1)]
        from_month: u32,

        /// Last month, inclusive
        #[arg(long, default_value_t = 12)]
        to_month: u32,

        /// Keep only the N busiest stations
        #[arg(long)]
        top: Option<usize>,

        /// Output file
        #[arg(short, long, default_value = "station_counts.csv")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _log_guard = init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            url,
            result_root,
            rows_per_file,
            interval,
            duration,
            start_index,
            timezone,
            timeout,
            max_failures,
        } => {
            let source = url
                .or_else(|| std::env::var("BIXI_STATION_STATUS_URL").ok())
                .unwrap_or_else(|| DEFAULT_STATION_STATUS_URL.to_string());
            let config = CollectorConfig {
                result_root,
                rows_per_file,
                interval: Duration::from_secs(interval),
                max_duration: (duration > 0).then(|| Duration::from_secs(duration.unsigned_abs())),
                start_index,
                max_consecutive_failures: max_failures,
            };
            let feed = GbfsFeed::new(
                BasicClient::new(Duration::from_secs(timeout))?,
                source,
                parse_timezone(&timezone)?,
            );

            info!(source = %feed.source(), "Starting Bixi sniffer");
            let collector = Collector::new(feed, config).await?;

            let shutdown = Shutdown::new();
            trap_ctrl_c(shutdown.clone());
            if duration <= 0 {
                info!("Collecting until Ctrl+C");
            }

            collector.run(shutdown.handle()).await?;
        }
        Commands::Snapshot {
            source,
            result_root,
            index,
            timezone,
            timeout,
        } => {
            let source = source.unwrap_or_else(|| DEFAULT_STATION_STATUS_URL.to_string());
            let feed = GbfsFeed::new(
                BasicClient::new(Duration::from_secs(timeout))?,
                source,
                parse_timezone(&timezone)?,
            );
            let snapshot = feed.fetch_snapshot().await?;

            info!(
                updated_at = %snapshot.updated_at,
                stations = snapshot.station_count(),
                bikes = snapshot.total_bikes(),
                ebikes = snapshot.total_ebikes(),
                "Snapshot"
            );

            if let Some(root) = result_root {
                let mut accumulator = Accumulator::new(root, 1, index, &snapshot)?;
                accumulator.accumulate(snapshot);
                accumulator.finish()?;
            }
        }
        Commands::StationCounts {
            trips,
            stations,
            year,
            from_month,
            to_month,
            top,
            output,
            format,
        } => {
            let range = DateRange::months(year, from_month, to_month)?;
            let trips = load_trips(&trips)?;
            let stations = load_stations(&stations)?;

            let selected = filter_by_date(&trips, &range);
            let counts = count_departures(selected.iter().copied());
            let result = station_counts(&counts, &stations, top);

            info!(
                trips = selected.len(),
                stations = result.len(),
                output = %output.display(),
                "Station counts computed"
            );

            match format {
                OutputFormat::Csv => write_records(&output, &result)?,
                OutputFormat::Json => write_json(&output, &result)?,
            }
        }
    }

    Ok(())
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("unknown time zone '{name}'"))
}

/// Colored stderr plus a JSON daily rolling log file.
fn init_tracing() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bixi_sniffer.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bixi_sniffer.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(guard)
}
