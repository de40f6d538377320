//! Forecast frame viewer driver.
//!
//! Loads the published forecast metadata and drives a viewer session over a
//! display-less map:
//! - `interval`: print the forecast run, its time interval and variables
//! - `animate`: step through frames, settling each one, and report timings
//! - `query`: read back the physical value at a location and time
//! - `legend`: print the colorbar legend of a series

mod commands;
mod metrics;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use frame_scheduler::ViewerConfig;

use commands::{Playback, Session, TimeArg};

#[derive(Parser, Debug)]
#[command(name = "frame-viewer")]
#[command(about = "Animate and query time-stepped forecast tiles")]
struct Args {
    /// Base URL or directory holding metadata.json and tiles/
    #[arg(long, env = "DATA_ROOT")]
    data_root: Option<String>,

    /// Frames pre-rendered ahead of the visible one
    #[arg(long)]
    look_ahead: Option<usize>,

    /// Tile byte cache budget in megabytes
    #[arg(long)]
    tile_cache_mb: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Series selection shared by the session commands.
#[derive(clap::Args, Debug, Clone)]
struct Selection {
    /// Variable to show (default: first published variable)
    #[arg(long)]
    variable: Option<String>,

    /// Pressure level in hPa, for level variables
    #[arg(long)]
    level: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the forecast run, its time interval and variables
    Interval,

    /// Step through frames and report how each one settled
    Animate {
        #[command(flatten)]
        selection: Selection,

        /// First time index
        #[arg(long, default_value = "0")]
        from: usize,

        /// Last time index (default: end of the run)
        #[arg(long)]
        to: Option<usize>,

        /// Viewport center latitude
        #[arg(long, default_value = "50.0", allow_hyphen_values = true)]
        lat: f64,

        /// Viewport center longitude
        #[arg(long, default_value = "5.0", allow_hyphen_values = true)]
        lon: f64,

        /// Map zoom
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=26))]
        zoom: u8,

        /// Tiles loaded on each side of the center tile
        #[arg(long, default_value = "1")]
        radius: u32,

        /// Pause between frames in milliseconds
        #[arg(long, default_value = "0")]
        frame_delay_ms: u64,

        /// Keep a point annotation open at the viewport center
        #[arg(long)]
        annotate: bool,
    },

    /// Read the value at a location from the rendered tiles
    Query {
        #[command(flatten)]
        selection: Selection,

        /// Time index or RFC 3339 instant
        #[arg(long, default_value = "0", value_parser = commands::parse_time)]
        time: TimeArg,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Map zoom the click happens at
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(0..=26))]
        zoom: u8,
    },

    /// Print the colorbar legend as JSON
    Legend {
        #[command(flatten)]
        selection: Selection,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Command output goes to stdout; logs go to stderr.
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let mut config = ViewerConfig::from_env();
    if let Some(root) = args.data_root {
        config.data_root = root;
    }
    if let Some(look_ahead) = args.look_ahead {
        config.look_ahead = look_ahead;
    }
    if let Some(mb) = args.tile_cache_mb {
        config.tile_cache_size_mb = mb;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    info!(data_root = %config.data_root, "Starting frame viewer");
    let session = Session::open(config).await?;

    match args.command {
        Command::Interval => {
            let summary = session.interval()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Animate {
            selection,
            from,
            to,
            lat,
            lon,
            zoom,
            radius,
            frame_delay_ms,
            annotate,
        } => {
            let viewport = frame_scheduler::Viewport {
                center_lat: lat,
                center_lon: lon,
                zoom,
                radius,
            };
            let reports = session
                .animate(
                    selection.variable.as_deref(),
                    selection.level,
                    viewport,
                    Playback {
                        from,
                        to,
                        frame_delay: std::time::Duration::from_millis(frame_delay_ms),
                        annotate,
                    },
                )
                .await?;
            for report in &reports {
                println!("{}", serde_json::to_string(report)?);
            }
        }
        Command::Query {
            selection,
            time,
            lat,
            lon,
            zoom,
        } => {
            match session
                .query(
                    selection.variable.as_deref(),
                    selection.level,
                    time,
                    lat,
                    lon,
                    zoom,
                )
                .await?
            {
                Some(reading) => println!("{}", reading),
                None => println!("No data at ({:.5}, {:.5})", lat, lon),
            }
        }
        Command::Legend { selection } => {
            let legend = session
                .legend(selection.variable.as_deref(), selection.level)
                .await?;
            println!("{}", serde_json::to_string_pretty(&legend)?);
        }
    }

    metrics::record_tile_cache(session.cache());
    let stats = session.cache().stats();
    info!(
        entries = session.cache().len(),
        size_bytes = session.cache().size_bytes(),
        hit_rate = stats.hit_rate(),
        "Tile cache"
    );

    Ok(())
}
