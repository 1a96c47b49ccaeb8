//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Shared primitives and utilities for the speed monitor."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use chrono::{DateTime, TimeDelta, Utc};

/// Latest simulation time reported by the feed.
///
/// Until the first clock update arrives, [`SimClock::now`] substitutes wall-clock
/// time so every session is measured against the same source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimClock {
    last_sim_time: Option<DateTime<Utc>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a simulation time update.
    pub fn observe(&mut self, simulation_time: DateTime<Utc>) {
        self.last_sim_time = Some(simulation_time);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.last_sim_time.unwrap_or_else(Utc::now)
    }

    pub fn has_simulation_time(&self) -> bool {
        self.last_sim_time.is_some()
    }
}

/// Convert a std duration into a chrono delta, saturating on overflow.
pub fn to_time_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Seconds between two instants as a float, negative when `later` precedes `earlier`.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1_000.0
}
