//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::TimeDelta;
use r8_speeder_common::config::SpeederConfig;
use r8_speeder_common::time::to_time_delta;

/// Thresholds and timings used by the session table, detector, and reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub alert_margin_mph: f64,
    pub over_margin_mph: f64,
    pub hysteresis_mph: f64,
    pub hard_couple_speed_mph: f64,
    pub stopped_epsilon_mph: f64,
    pub confirmation_delay: TimeDelta,
    pub sustained_duration: TimeDelta,
    pub stale_timeout: TimeDelta,
    pub reaper_interval: Duration,
    pub speed_change_messages: bool,
}

impl TrackerSettings {
    pub fn from_config(config: &SpeederConfig) -> Self {
        Self {
            alert_margin_mph: config.limits.alert_margin_mph,
            over_margin_mph: config.limits.over_margin_mph,
            hysteresis_mph: config.tracker.hysteresis_mph,
            hard_couple_speed_mph: config.limits.hard_couple_speed_mph,
            stopped_epsilon_mph: config.tracker.stopped_epsilon_mph,
            confirmation_delay: to_time_delta(config.tracker.confirmation_delay),
            sustained_duration: to_time_delta(config.limits.sustained_duration),
            stale_timeout: to_time_delta(config.tracker.stale_timeout),
            reaper_interval: config.tracker.reaper_interval,
            speed_change_messages: config.notifications.speed_change_messages,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&SpeederConfig::default())
    }
}
