//! Dwell records - one row per vehicle departure.
//!
//! Rows are appended as JSON lines and flushed before a cycle completes.
//! The file is append-only; replication works from sorted copies.

use crate::occupancy::{Departure, LaneId};
use crate::detection::VehicleId;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

// ============================================================================
// WALL CLOCK
// ============================================================================

/// Maps cycle timestamps (seconds since the engine epoch) to local time.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: DateTime<Utc>,
    offset: FixedOffset,
}

impl WallClock {
    /// `epoch` is the wall time at cycle time zero. Offsets outside ±24h
    /// fall back to UTC.
    pub fn new(epoch: SystemTime, utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix());
        Self {
            epoch: DateTime::<Utc>::from(epoch),
            offset,
        }
    }

    /// Local date-time of cycle time `t`.
    pub fn at(&self, t: f64) -> DateTime<FixedOffset> {
        let millis = (t * 1000.0).round() as i64;
        (self.epoch + chrono::Duration::milliseconds(millis)).with_timezone(&self.offset)
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// One departure, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellRecord {
    /// Local date of the exit, `YYYY-MM-DD`
    pub date: String,
    pub vehicle_id: VehicleId,
    /// Class label recorded at entry
    pub label: String,
    pub lane: LaneId,
    /// Local time of entry, `HH:MM:SS`
    pub arrival_time: String,
    /// Local time of exit, `HH:MM:SS`
    pub exit_time: String,
    /// Dwell duration, rounded to centiseconds
    pub wait_seconds: f64,
}

impl DwellRecord {
    pub fn from_departure(dep: &Departure, clock: &WallClock) -> Self {
        let arrival = clock.at(dep.arrived_at);
        let exit = clock.at(dep.exited_at);
        Self {
            date: exit.format("%Y-%m-%d").to_string(),
            vehicle_id: dep.vehicle_id,
            label: dep.label.clone(),
            lane: dep.lane,
            arrival_time: arrival.format("%H:%M:%S").to_string(),
            exit_time: exit.format("%H:%M:%S").to_string(),
            wait_seconds: (dep.wait_seconds() * 100.0).round() / 100.0,
        }
    }
}

/// Chronological order: date, then arrival, then exit.
pub fn sort_dwell_records(records: &mut [DwellRecord]) {
    records.sort_by(|a, b| {
        (&a.date, &a.arrival_time, &a.exit_time).cmp(&(&b.date, &b.arrival_time, &b.exit_time))
    });
}

// ============================================================================
// SINK
// ============================================================================

/// Append-only JSON-lines writer for dwell records.
pub struct DwellLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_written: u64,
}

impl DwellLogWriter {
    /// Open `path` for appending, creating it if needed.
    ///
    /// A torn last line (power loss mid-append) is terminated first so the
    /// next record starts on a line of its own.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        if ends_mid_line(&mut file)? {
            warn!("Dwell log {} ends in a partial row; starting a new line", path.display());
            file.write_all(b"\n")?;
        }
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append and flush.
    pub fn append(&mut self, records: &[DwellRecord]) -> Result<(), LogError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
            self.rows_written += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Read every record from a dwell log.
///
/// Blank lines are skipped. Rows that do not decode (a torn append) are
/// skipped with a warning rather than failing the whole read.
pub fn read_dwell_log(path: impl AsRef<Path>) -> Result<Vec<DwellRecord>, LogError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut records: Vec<DwellRecord> = Vec::new();
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match serde_json::from_slice(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping unreadable row {} of {}: {}", idx + 1, path.display(), e),
        }
    }
    Ok(records)
}

/// Write a chronologically sorted copy of `src` to `dst`.
///
/// The copy is written beside `dst` and renamed into place, so readers
/// never see a half-written file. Returns the number of rows copied.
pub fn write_sorted_copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<usize, LogError> {
    let mut records = read_dwell_log(src)?;
    sort_dwell_records(&mut records);

    let dst = dst.as_ref();
    let tmp = dst.with_extension("jsonl.tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for record in &records {
            serde_json::to_writer(&mut out, record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    std::fs::rename(&tmp, dst)?;
    Ok(records.len())
}

/// Errors from the dwell log sink.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Dwell log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dwell log encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
