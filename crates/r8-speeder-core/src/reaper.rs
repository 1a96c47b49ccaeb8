//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Periodic eviction of sessions that stopped reporting."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::events::TrackerEvent;
use crate::session::SessionTable;
use crate::settings::TrackerSettings;
use crate::tracker::SpeedTracker;

/// Removes sessions whose last sample is older than the stale timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaleSessionReaper {
    timeout: TimeDelta,
    interval: Duration,
}

impl StaleSessionReaper {
    pub fn new(timeout: TimeDelta, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self::new(settings.stale_timeout, settings.reaper_interval)
    }

    pub fn timeout(&self) -> TimeDelta {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One sweep against the current simulation time.
    pub fn sweep(&self, table: &mut SessionTable, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        let before = table.len();
        let events = table.evict_stale(now, self.timeout);
        let evicted = before - table.len();
        if evicted > 0 {
            debug!(evicted, remaining = table.len(), "reaper sweep");
        }
        events
    }
}

/// Run the reaper on the tracker until `shutdown` fires.
pub fn spawn_reaper(
    tracker: Arc<SpeedTracker>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tracker.reaper().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = tracker.reaper().interval().as_millis() as u64,
            timeout_ms = tracker.reaper().timeout().num_milliseconds(),
            "stale session reaper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("stale session reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    tracker.sweep();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EffectiveLimitCalculator;
    use crate::telemetry::{ControllerKind, TelemetrySample, TrainReport};

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn player(id: i64) -> TrainReport {
        TrainReport {
            id,
            controller_kind: ControllerKind::Player,
            engineer_name: "morgan".into(),
            train_symbol: "Z-LACWSP".into(),
            speed_mph: 20.0,
            speed_limit_mph: 40.0,
            axle_count: 60,
            block_id: 21000,
            railroad_initials: "BNSF".into(),
            loco_number: 5001,
        }
    }

    #[test]
    fn sweep_times_out_only_idle_sessions() {
        let settings = TrackerSettings::default();
        let reaper = StaleSessionReaper::from_settings(&settings);
        let mut table = SessionTable::new(&settings, EffectiveLimitCalculator::default());
        table.update(&TelemetrySample::stamp(player(1), start()));
        table.update(&TelemetrySample::stamp(
            player(2),
            start() + TimeDelta::milliseconds(1_500),
        ));

        let events = reaper.sweep(&mut table, start() + TimeDelta::milliseconds(2_500));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label(), "timeout");
        assert_eq!(events[0].train.train_id, 1);
        assert!(table.get(2).is_some());
    }

    #[test]
    fn zero_interval_is_bumped() {
        let reaper = StaleSessionReaper::new(TimeDelta::seconds(2), Duration::ZERO);
        assert_eq!(reaper.interval(), Duration::from_millis(1));
    }
}
