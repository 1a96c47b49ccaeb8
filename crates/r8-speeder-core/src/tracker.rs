//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r8_speeder_common::config::SpeederConfig;
use r8_speeder_common::time::SimClock;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::events::TrackerEvent;
use crate::limits::EffectiveLimitCalculator;
use crate::notify::{NotificationRouter, NotificationSink};
use crate::reaper::StaleSessionReaper;
use crate::session::{SessionSummary, SessionTable};
use crate::settings::TrackerSettings;
use crate::telemetry::{TelemetrySample, TrainReport};

#[derive(Debug)]
struct TrackerState {
    table: SessionTable,
    clock: SimClock,
}

/// Entry point shared by the telemetry feed, the clock feed, and the reaper.
///
/// All three serialize through one lock around the session table. The lock
/// covers state transitions and event construction only; notification sends
/// are dispatched after it is released.
#[derive(Debug)]
pub struct SpeedTracker {
    state: Mutex<TrackerState>,
    router: NotificationRouter,
    reaper: StaleSessionReaper,
    self_name: String,
}

impl SpeedTracker {
    pub fn new(
        settings: &TrackerSettings,
        limits: EffectiveLimitCalculator,
        router: NotificationRouter,
        self_name: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                table: SessionTable::new(settings, limits),
                clock: SimClock::new(),
            }),
            router,
            reaper: StaleSessionReaper::from_settings(settings),
            self_name: self_name.into(),
        }
    }

    pub fn from_config(
        config: &SpeederConfig,
        sink: Arc<dyn NotificationSink>,
        runtime: Handle,
    ) -> Self {
        let settings = TrackerSettings::from_config(config);
        let limits = EffectiveLimitCalculator::from_config(&config.limits);
        let router = NotificationRouter::new(sink, &config.notifications, runtime);
        info!(
            sink = router.sink_name(),
            confirmation_ms = settings.confirmation_delay.num_milliseconds(),
            sustained_secs = settings.sustained_duration.num_seconds(),
            stale_ms = settings.stale_timeout.num_milliseconds(),
            "speed tracker configured"
        );
        Self::new(&settings, limits, router, config.notifications.self_name.clone())
    }

    /// Process one train report stamped with the current simulation time.
    pub fn on_train_data(&self, report: TrainReport) -> Vec<TrackerEvent> {
        let events = {
            let mut state = self.state.lock();
            let sample = TelemetrySample::stamp(report, state.clock.now());
            state.table.update(&sample)
        };
        self.router.dispatch(&events);
        events
    }

    /// Record a simulation clock update from the feed.
    pub fn on_simulation_time(&self, simulation_time: DateTime<Utc>) {
        let mut state = self.state.lock();
        if !state.clock.has_simulation_time() {
            // Sessions seen so far were stamped with wall-clock time.
            let offset = simulation_time - state.clock.now();
            state.table.shift_timestamps(offset);
            debug!(
                %simulation_time,
                offset_ms = offset.num_milliseconds(),
                sessions = state.table.len(),
                "first simulation time observed"
            );
        }
        state.clock.observe(simulation_time);
    }

    /// Evict stale sessions against the current simulation time.
    pub fn sweep(&self) -> Vec<TrackerEvent> {
        let events = {
            let mut state = self.state.lock();
            let now = state.clock.now();
            self.reaper.sweep(&mut state.table, now)
        };
        self.router.dispatch(&events);
        events
    }

    /// Post the startup line to the status channel.
    pub fn announce_startup(&self) {
        self.router
            .announce(format!("{} connected and is monitoring trains.", self.self_name));
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().clock.now()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.state.lock().table.summaries()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().table.active_count()
    }

    pub fn reaper(&self) -> &StaleSessionReaper {
        &self.reaper
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }
}
