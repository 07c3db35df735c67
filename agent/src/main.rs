//! LaneGate Agent - Junction Controller
//!
//! Reads detection frames from stdin (one JSON line per camera frame),
//! runs the lane arbitration cycle on each, and drives the signal head
//! over TCP.
//!
//! Accepted frame lines:
//!
//! ```text
//! [{"id": 7, "label": "car", "bbox": [120, 80, 180, 140]}, ...]
//! {"detections": [{"id": 7, "label": "car", "bbox": [120, 80, 180, 140]}]}
//! ```
//!
//! Environment:
//! - `LANEGATE_CONFIG` - controller config JSON (default `lanegate.json`, or first argument)
//! - `LANEGATE_ACTUATOR` - signal head address (default `127.0.0.1:7000`)
//! - `LANEGATE_MIRROR_DIR` - dwell log mirror directory (default `log_mirror`)
//! - `RUST_LOG` - tracing filter (default `info`)

mod mirror;
mod transport;

use anyhow::{Context, Result};
use lanegate_core::{validate_frame, ControllerConfig, ControllerRuntime, RawDetection};
use lanegate_env::{LaneContext, TokioContext};
use mirror::DirectoryReplicator;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use transport::TcpTransport;

const DEFAULT_CONFIG: &str = "lanegate.json";
const DEFAULT_ACTUATOR: &str = "127.0.0.1:7000";
const DEFAULT_MIRROR_DIR: &str = "log_mirror";

/// One line of detector output.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrameLine {
    Bare(Vec<RawDetection>),
    Wrapped { detections: Vec<RawDetection> },
}

impl FrameLine {
    fn into_raw(self) -> Vec<RawDetection> {
        match self {
            FrameLine::Bare(raw) => raw,
            FrameLine::Wrapped { detections } => detections,
        }
    }
}

fn parse_frame(line: &str) -> Option<Vec<RawDetection>> {
    serde_json::from_str::<FrameLine>(line).ok().map(FrameLine::into_raw)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LANEGATE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let actuator = std::env::var("LANEGATE_ACTUATOR").unwrap_or_else(|_| DEFAULT_ACTUATOR.to_string());
    let mirror_dir = std::env::var("LANEGATE_MIRROR_DIR").unwrap_or_else(|_| DEFAULT_MIRROR_DIR.to_string());

    let config = ControllerConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path))?;
    info!(
        "🚦 LaneGate agent v{}: {} lanes, min hold {:.1}s",
        env!("CARGO_PKG_VERSION"),
        config.arbiter.lane_count,
        config.arbiter.min_hold_seconds
    );

    let context = TokioContext::shared();
    let mut runtime = ControllerRuntime::from_store(context.clone(), config)?;
    runtime.start(TcpTransport::new(actuator), Arc::new(DirectoryReplicator::new(mirror_dir)))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut skipped: u64 = 0;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading detection frames")?,
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            info!("Detection stream closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(raw) = parse_frame(&line) else {
            skipped += 1;
            warn!("Skipping unparseable frame line ({} so far)", skipped);
            continue;
        };

        let started = context.now();
        let output = runtime.run_cycle(validate_frame(raw));
        debug!(
            "Cycle {}: active lane {}, {} commands",
            runtime.engine().cycles(),
            output.active_lane,
            output.commands.len()
        );
        runtime.pace(started).await;
    }

    let stats = runtime.shutdown()?;
    info!(
        "Shutdown complete: {} cycles, {} commands sent, {} dropped, {} dwell rows, {} sink faults",
        stats.cycles, stats.commands_sent, stats.commands_dropped, stats.dwell_rows, stats.sink_faults
    );
    Ok(())
}
