//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable train identifier assigned by the simulator.
pub type TrainId = i64;

/// Who is driving the train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Player,
    #[serde(alias = "ai", alias = "nonplayer")]
    Other,
}

impl ControllerKind {
    pub fn is_player(self) -> bool {
        matches!(self, ControllerKind::Player)
    }
}

/// One train record as delivered by the telemetry feed.
///
/// Numeric fields are mandatory; the name fields may arrive empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub id: TrainId,
    pub controller_kind: ControllerKind,
    #[serde(default)]
    pub engineer_name: String,
    #[serde(default)]
    pub train_symbol: String,
    pub speed_mph: f64,
    pub speed_limit_mph: f64,
    pub axle_count: u32,
    pub block_id: i64,
    #[serde(default)]
    pub railroad_initials: String,
    pub loco_number: u32,
}

impl TrainReport {
    /// Locomotive label, e.g. `BNSF 4721`.
    pub fn loco_label(&self) -> String {
        format!("{} {}", self.railroad_initials, self.loco_number)
            .trim()
            .to_owned()
    }
}

/// A train report stamped with the simulation time it was processed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    #[serde(flatten)]
    pub report: TrainReport,
    pub sim_time: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn stamp(report: TrainReport, sim_time: DateTime<Utc>) -> Self {
        Self { report, sim_time }
    }

    pub fn id(&self) -> TrainId {
        self.report.id
    }

    pub fn is_player(&self) -> bool {
        self.report.controller_kind.is_player()
    }
}
