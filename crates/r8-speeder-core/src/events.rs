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
use serde::Serialize;

use crate::session::MotionStatus;
use crate::telemetry::TrainId;

/// Identity of the train an event refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRef {
    pub train_id: TrainId,
    pub engineer: String,
    pub symbol: String,
    pub block_id: i64,
}

/// Event catalog produced by the session table, violation detector, and reaper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Acquired {
        loco: String,
    },
    Relinquished,
    Coupled {
        speed_mph: f64,
        hard: bool,
    },
    SpeedingBegan {
        speed_mph: f64,
        posted_limit_mph: f64,
        effective_limit_mph: f64,
    },
    OverspeedBan {
        speed_mph: f64,
        posted_limit_mph: f64,
        effective_limit_mph: f64,
        overage_mph: f64,
    },
    SustainedBan {
        speed_mph: f64,
        posted_limit_mph: f64,
        duration_secs: f64,
    },
    SpeedingCleared {
        speed_mph: f64,
        duration_secs: f64,
        max_overage_mph: f64,
        escalated: bool,
    },
    Timeout {
        idle_secs: f64,
    },
    ZeroSpeedLimit,
    SpeedChanged {
        speed_mph: f64,
        change_mph: f64,
        motion: MotionStatus,
    },
}

/// Logical channels an event is delivered to, besides the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    pub status: bool,
    pub alert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerEvent {
    pub at: DateTime<Utc>,
    pub train: TrainRef,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TrackerEvent {
    pub fn new(at: DateTime<Utc>, train: TrainRef, kind: EventKind) -> Self {
        Self { at, train, kind }
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            EventKind::Acquired { .. } => "acquired",
            EventKind::Relinquished => "relinquished",
            EventKind::Coupled { .. } => "coupled",
            EventKind::SpeedingBegan { .. } => "speeding_began",
            EventKind::OverspeedBan { .. } => "overspeed_ban",
            EventKind::SustainedBan { .. } => "sustained_ban",
            EventKind::SpeedingCleared { .. } => "speeding_cleared",
            EventKind::Timeout { .. } => "timeout",
            EventKind::ZeroSpeedLimit => "zero_speed_limit",
            EventKind::SpeedChanged { .. } => "speed_changed",
        }
    }

    /// Session lifecycle events, which operators may opt out of on the status channel.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Acquired { .. } | EventKind::Relinquished | EventKind::Timeout { .. }
        )
    }

    pub fn is_violation(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SpeedingBegan { .. }
                | EventKind::OverspeedBan { .. }
                | EventKind::SustainedBan { .. }
        ) || matches!(self.kind, EventKind::Coupled { hard: true, .. })
    }

    /// Channel routing fixed at the point each event is emitted.
    pub fn route(&self) -> Route {
        match self.kind {
            EventKind::Coupled { hard, .. } => Route {
                status: true,
                alert: hard,
            },
            EventKind::OverspeedBan { .. } | EventKind::SustainedBan { .. } => Route {
                status: false,
                alert: true,
            },
            EventKind::SpeedingCleared { escalated, .. } => Route {
                status: true,
                alert: escalated,
            },
            _ => Route {
                status: true,
                alert: false,
            },
        }
    }

    /// Operator-facing text for the event.
    pub fn message(&self) -> String {
        let time = self.at.format("%H:%M:%S");
        let engineer = display_or(&self.train.engineer, "Unknown engineer");
        let symbol = display_or(&self.train.symbol, "an unnamed train");
        let block = self.train.block_id;
        match &self.kind {
            EventKind::Acquired { loco } => format!(
                "[{time}] {engineer} took control of {symbol}, Loco: {loco}, TrainID: {}",
                self.train.train_id
            ),
            EventKind::Relinquished => {
                format!("[{time}] {engineer} relinquished control of {symbol}.")
            }
            EventKind::Coupled { speed_mph, hard } => {
                let prefix = if *hard { "Hard coupling: " } else { "" };
                format!(
                    "[{time}] {prefix}{engineer} on {symbol} coupled at {speed_mph:.1} MPH (Block {block})."
                )
            }
            EventKind::SpeedingBegan {
                speed_mph,
                posted_limit_mph,
                ..
            } => format!(
                "[{time}] {engineer} on {symbol} began speeding: {speed_mph:.1} MPH in a {posted_limit_mph:.0} MPH zone (Block {block})."
            ),
            EventKind::OverspeedBan {
                speed_mph,
                posted_limit_mph,
                overage_mph,
                ..
            } => format!(
                "[{time}] Overspeed ban: {engineer} on {symbol} reached {speed_mph:.1} MPH in a {posted_limit_mph:.0} MPH zone, {overage_mph:.1} MPH over (Block {block})."
            ),
            EventKind::SustainedBan {
                speed_mph,
                posted_limit_mph,
                duration_secs,
            } => format!(
                "[{time}] Sustained speeding ban: {engineer} on {symbol} has been speeding for {} ({speed_mph:.1} MPH in a {posted_limit_mph:.0} MPH zone, Block {block}).",
                format_duration(*duration_secs)
            ),
            EventKind::SpeedingCleared {
                speed_mph,
                duration_secs,
                max_overage_mph,
                ..
            } => format!(
                "[{time}] {engineer} on {symbol} is no longer speeding ({speed_mph:.1} MPH) after {}, max {max_overage_mph:.1} MPH over the limit.",
                format_duration(*duration_secs)
            ),
            EventKind::Timeout { .. } => format!(
                "[{time}] Player train {} ({engineer} on {symbol}) no longer reporting data.",
                self.train.train_id
            ),
            EventKind::ZeroSpeedLimit => format!(
                "{engineer}, briefly relinquish your train to fix a 0mph speed limit error. This is an automated message."
            ),
            EventKind::SpeedChanged {
                speed_mph,
                change_mph,
                motion,
            } => format!(
                "[{time}] {engineer} on {symbol} {} (Speed: {speed_mph:.1} MPH, Change: {change_mph:.1} MPH)",
                motion.as_str()
            ),
        }
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Render seconds as `4m 05s` (or `12s` below a minute).
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (minutes, secs) = (total / 60, total % 60);
    if minutes == 0 {
        format!("{secs}s")
    } else {
        format!("{minutes}m {secs:02}s")
    }
}
