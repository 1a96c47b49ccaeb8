//! ---
//! r8s_section: "11-simulation-test-harness"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Scenario replay feed for offline runs and tests."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use r8_speeder_core::{ControllerKind, SpeedTracker, TrainId, TrainReport};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unable to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid scenario CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("unsupported scenario format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
}

/// Raw scenario row. A row carries a clock update, a train report, or both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioRow {
    #[serde(default)]
    pub simulation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub id: Option<TrainId>,
    #[serde(default)]
    pub controller_kind: Option<ControllerKind>,
    #[serde(default)]
    pub engineer_name: Option<String>,
    #[serde(default)]
    pub train_symbol: Option<String>,
    #[serde(default)]
    pub speed_mph: Option<f64>,
    #[serde(default)]
    pub speed_limit_mph: Option<f64>,
    #[serde(default)]
    pub axle_count: Option<u32>,
    #[serde(default)]
    pub block_id: Option<i64>,
    #[serde(default)]
    pub railroad_initials: Option<String>,
    #[serde(default)]
    pub loco_number: Option<u32>,
}

impl ScenarioRow {
    /// Clock update first, then the train report, mirroring the live feeds.
    pub fn into_records(self, row: usize) -> Result<Vec<FeedRecord>, FeedError> {
        let mut records = Vec::with_capacity(2);
        if let Some(time) = self.simulation_time {
            records.push(FeedRecord::Clock(time));
        }
        if let Some(id) = self.id {
            let missing = |field: &str| FeedError::InvalidRow {
                row,
                reason: format!("train {id} is missing `{field}`"),
            };
            records.push(FeedRecord::Train(TrainReport {
                id,
                controller_kind: self.controller_kind.ok_or_else(|| missing("controller_kind"))?,
                engineer_name: self.engineer_name.unwrap_or_default(),
                train_symbol: self.train_symbol.unwrap_or_default(),
                speed_mph: self.speed_mph.ok_or_else(|| missing("speed_mph"))?,
                speed_limit_mph: self.speed_limit_mph.ok_or_else(|| missing("speed_limit_mph"))?,
                axle_count: self.axle_count.unwrap_or_default(),
                block_id: self.block_id.unwrap_or_default(),
                railroad_initials: self.railroad_initials.unwrap_or_default(),
                loco_number: self.loco_number.unwrap_or_default(),
            }));
        }
        if records.is_empty() {
            return Err(FeedError::InvalidRow {
                row,
                reason: "row has neither simulation_time nor id".into(),
            });
        }
        Ok(records)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedRecord {
    Clock(DateTime<Utc>),
    Train(TrainReport),
}

/// Counters reported when a replay finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub clock_updates: usize,
    pub samples: usize,
    pub events: usize,
    pub interrupted: bool,
}

/// Ordered feed records loaded from a scenario file.
#[derive(Debug, Default, Clone)]
pub struct ReplayFeed {
    records: Vec<FeedRecord>,
    skipped: usize,
}

impl ReplayFeed {
    pub fn from_path(path: &Path) -> Result<Self, FeedError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(path),
            Some("csv") => Self::from_csv(path),
            _ => Err(FeedError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Build a feed from rows, skipping the ones that do not describe a record.
    pub fn from_rows(rows: impl IntoIterator<Item = ScenarioRow>) -> Self {
        let mut feed = Self::default();
        for (index, row) in rows.into_iter().enumerate() {
            feed.push_row(index + 1, Ok(row));
        }
        feed
    }

    pub fn records(&self) -> &[FeedRecord] {
        &self.records
    }

    /// Rows dropped while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push_row(&mut self, row: usize, parsed: Result<ScenarioRow, FeedError>) {
        match parsed.and_then(|raw| raw.into_records(row)) {
            Ok(records) => self.records.extend(records),
            Err(err) => {
                warn!(row, error = %err, "skipping scenario row");
                self.skipped += 1;
            }
        }
    }

    fn from_json(path: &Path) -> Result<Self, FeedError> {
        let contents = fs::read_to_string(path).map_err(|source| FeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&contents)?;
        let mut feed = Self::default();
        for (index, value) in rows.into_iter().enumerate() {
            let parsed = serde_json::from_value::<ScenarioRow>(value).map_err(FeedError::from);
            feed.push_row(index + 1, parsed);
        }
        Ok(feed)
    }

    fn from_csv(path: &Path) -> Result<Self, FeedError> {
        let file = fs::File::open(path).map_err(|source| FeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let mut feed = Self::default();
        for (index, row) in reader.deserialize::<ScenarioRow>().enumerate() {
            feed.push_row(index + 1, row.map_err(FeedError::from));
        }
        Ok(feed)
    }

    /// Replay every record into `tracker`, pacing clock updates by their
    /// simulation deltas divided by `speedup`. Returns early on shutdown.
    pub async fn run(
        &self,
        tracker: &SpeedTracker,
        speedup: f64,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> FeedStats {
        let mut stats = FeedStats::default();
        let mut last_clock: Option<DateTime<Utc>> = None;
        for record in &self.records {
            match record {
                FeedRecord::Clock(time) => {
                    if let Some(pause) = last_clock.and_then(|prev| pacing(prev, *time, speedup)) {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!("scenario replay interrupted");
                                stats.interrupted = true;
                                return stats;
                            }
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    tracker.on_simulation_time(*time);
                    last_clock = Some(*time);
                    stats.clock_updates += 1;
                }
                FeedRecord::Train(report) => {
                    stats.events += tracker.on_train_data(report.clone()).len();
                    stats.samples += 1;
                }
            }
        }
        debug!(?stats, "scenario replay finished");
        stats
    }
}

/// Wall-clock pause between two clock updates, if any. Saturates instead of overflowing.
fn pacing(previous: DateTime<Utc>, next: DateTime<Utc>, speedup: f64) -> Option<Duration> {
    if !speedup.is_finite() || speedup <= 0.0 {
        return None;
    }
    let delta = (next - previous).to_std().ok()?;
    let scaled = delta.as_secs_f64() / speedup;
    (scaled > 0.0).then(|| Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX))
}

/// Run `feed` on its own task.
pub fn spawn_feed(
    feed: ReplayFeed,
    tracker: Arc<SpeedTracker>,
    speedup: f64,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<FeedStats> {
    tokio::spawn(async move {
        info!(records = feed.len(), skipped = feed.skipped(), speedup, "scenario replay started");
        feed.run(&tracker, speedup, &mut shutdown).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_709_280_000 + secs, 0).expect("timestamp")
    }

    #[test]
    fn row_with_clock_and_train_yields_both_in_order() {
        let row = ScenarioRow {
            simulation_time: Some(at(0)),
            id: Some(4),
            controller_kind: Some(ControllerKind::Player),
            speed_mph: Some(20.0),
            speed_limit_mph: Some(30.0),
            ..ScenarioRow::default()
        };
        let records = row.into_records(1).expect("valid row");
        assert!(matches!(records[0], FeedRecord::Clock(_)));
        assert!(matches!(records[1], FeedRecord::Train(ref r) if r.id == 4));
    }

    #[test]
    fn train_row_without_speed_is_rejected() {
        let row = ScenarioRow {
            id: Some(4),
            controller_kind: Some(ControllerKind::Player),
            ..ScenarioRow::default()
        };
        let err = row.into_records(7).expect_err("missing speed");
        assert!(err.to_string().contains("row 7"));
    }

    #[test]
    fn empty_rows_are_counted_as_skipped() {
        let feed = ReplayFeed::from_rows([
            ScenarioRow::default(),
            ScenarioRow {
                simulation_time: Some(at(1)),
                ..ScenarioRow::default()
            },
        ]);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.skipped(), 1);
    }

    #[test]
    fn pacing_scales_and_ignores_backwards_time() {
        assert_eq!(pacing(at(0), at(2), 4.0), Some(Duration::from_millis(500)));
        assert_eq!(pacing(at(2), at(0), 1.0), None);
        assert_eq!(pacing(at(0), at(0), 1.0), None);
        assert_eq!(pacing(at(0), at(5), 0.0), None);
    }

    #[test]
    fn tiny_speedup_saturates_the_pause() {
        assert_eq!(pacing(at(0), at(5), 1e-300), Some(Duration::MAX));
    }
}
