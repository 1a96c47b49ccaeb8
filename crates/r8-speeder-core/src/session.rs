//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use r8_speeder_common::time::seconds_between;
use serde::Serialize;
use tracing::{debug, info};

use crate::events::{EventKind, TrackerEvent, TrainRef};
use crate::limits::EffectiveLimitCalculator;
use crate::settings::TrackerSettings;
use crate::telemetry::{ControllerKind, TelemetrySample, TrainId};
use crate::violation::{SpeedingEpisode, SpeedingState, ViolationDetector};

/// Speed change worth a diagnostic line.
const SPEED_CHANGE_LOG_MPH: f64 = 0.1;
/// Speed change worth a status message when speed change messages are enabled.
const SPEED_CHANGE_NOTIFY_MPH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    Stopped,
    Accelerating,
    Decelerating,
    Steady,
}

impl MotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionStatus::Stopped => "stopped",
            MotionStatus::Accelerating => "accelerating",
            MotionStatus::Decelerating => "decelerating",
            MotionStatus::Steady => "steady",
        }
    }
}

/// Tracked state for one train id.
#[derive(Debug, Clone)]
pub struct TrainSession {
    pub id: TrainId,
    pub controller_kind: ControllerKind,
    /// Last non-empty engineer name.
    pub engineer_name: String,
    /// Last non-empty train symbol.
    pub train_symbol: String,
    pub last_speed_mph: Option<f64>,
    pub last_axle_count: Option<u32>,
    pub last_block_id: i64,
    pub last_seen: DateTime<Utc>,
    /// Player-controlled and announced as acquired.
    pub active: bool,
    pub status: MotionStatus,
    pub violation: Option<SpeedingEpisode>,
}

impl TrainSession {
    fn new(sample: &TelemetrySample) -> Self {
        Self {
            id: sample.id(),
            controller_kind: sample.report.controller_kind,
            engineer_name: String::new(),
            train_symbol: String::new(),
            last_speed_mph: None,
            last_axle_count: None,
            last_block_id: sample.report.block_id,
            last_seen: sample.sim_time,
            active: false,
            status: MotionStatus::Steady,
            violation: None,
        }
    }

    fn refresh_identity(&mut self, sample: &TelemetrySample) {
        let report = &sample.report;
        if !report.engineer_name.trim().is_empty() {
            self.engineer_name = report.engineer_name.clone();
        }
        if !report.train_symbol.trim().is_empty() {
            self.train_symbol = report.train_symbol.clone();
        }
    }

    pub fn train_ref(&self) -> TrainRef {
        TrainRef {
            train_id: self.id,
            engineer: self.engineer_name.clone(),
            symbol: self.train_symbol.clone(),
            block_id: self.last_block_id,
        }
    }

    pub fn speeding_state(&self) -> SpeedingState {
        SpeedingState::of(self.violation.as_ref())
    }
}

/// Read-only view of a session for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub train_id: TrainId,
    pub controller_kind: ControllerKind,
    pub engineer: String,
    pub symbol: String,
    pub active: bool,
    pub speeding: SpeedingState,
    pub last_speed_mph: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

impl From<&TrainSession> for SessionSummary {
    fn from(session: &TrainSession) -> Self {
        Self {
            train_id: session.id,
            controller_kind: session.controller_kind,
            engineer: session.engineer_name.clone(),
            symbol: session.train_symbol.clone(),
            active: session.active,
            speeding: session.speeding_state(),
            last_speed_mph: session.last_speed_mph,
            last_seen: session.last_seen,
        }
    }
}

/// Owns every tracked session. All transitions go through its methods.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<TrainId, TrainSession>,
    detector: ViolationDetector,
    hard_couple_speed_mph: f64,
    stopped_epsilon_mph: f64,
    speed_change_messages: bool,
}

impl SessionTable {
    pub fn new(settings: &TrackerSettings, limits: EffectiveLimitCalculator) -> Self {
        Self {
            sessions: HashMap::new(),
            detector: ViolationDetector::new(limits, settings),
            hard_couple_speed_mph: settings.hard_couple_speed_mph,
            stopped_epsilon_mph: settings.stopped_epsilon_mph,
            speed_change_messages: settings.speed_change_messages,
        }
    }

    /// Apply one sample and return the events it produced, in emission order.
    pub fn update(&mut self, sample: &TelemetrySample) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        let id = sample.id();
        let report = &sample.report;
        let now = sample.sim_time;
        let current_kind = report.controller_kind;
        let previous_kind = self
            .sessions
            .get(&id)
            .map_or(current_kind, |session| session.controller_kind);

        if previous_kind.is_player() && !current_kind.is_player() {
            if let Some(session) = self.sessions.remove(&id) {
                let mut train = session.train_ref();
                if train.engineer.is_empty() {
                    train.engineer = report.engineer_name.clone();
                }
                if train.symbol.is_empty() {
                    train.symbol = report.train_symbol.clone();
                }
                train.block_id = report.block_id;
                info!(train_id = id, engineer = %train.engineer, symbol = %train.symbol, "control relinquished");
                events.push(TrackerEvent::new(now, train, EventKind::Relinquished));
            }
        }

        let session = self
            .sessions
            .entry(id)
            .or_insert_with(|| TrainSession::new(sample));
        session.last_block_id = report.block_id;
        session.last_seen = now;

        if current_kind.is_player() {
            session.refresh_identity(sample);

            let mut speed = report.speed_mph;
            if speed.abs() <= self.stopped_epsilon_mph {
                speed = 0.0;
                session.status = MotionStatus::Stopped;
            }

            if let Some(previous) = session.last_speed_mph {
                let change = speed.abs() - previous.abs();
                if change.abs() > SPEED_CHANGE_LOG_MPH {
                    let motion = if speed == 0.0 {
                        MotionStatus::Stopped
                    } else if change > 0.0 {
                        MotionStatus::Accelerating
                    } else {
                        MotionStatus::Decelerating
                    };
                    session.status = motion;
                    debug!(
                        train_id = id,
                        engineer = %session.engineer_name,
                        symbol = %session.train_symbol,
                        speed_mph = speed,
                        change_mph = change,
                        motion = motion.as_str(),
                        "speed change"
                    );
                    if self.speed_change_messages
                        && (speed == 0.0 || change.abs() > SPEED_CHANGE_NOTIFY_MPH)
                    {
                        events.push(TrackerEvent::new(
                            now,
                            session.train_ref(),
                            EventKind::SpeedChanged {
                                speed_mph: speed,
                                change_mph: change,
                                motion,
                            },
                        ));
                    }
                } else if speed != 0.0 {
                    session.status = MotionStatus::Steady;
                }
            }

            if let Some(previous_axles) = session.last_axle_count {
                if report.axle_count > previous_axles {
                    let coupling_speed = session.last_speed_mph.unwrap_or(speed).abs();
                    let hard = coupling_speed > self.hard_couple_speed_mph;
                    info!(
                        train_id = id,
                        axles_before = previous_axles,
                        axles_after = report.axle_count,
                        speed_mph = coupling_speed,
                        hard,
                        "coupling detected"
                    );
                    events.push(TrackerEvent::new(
                        now,
                        session.train_ref(),
                        EventKind::Coupled {
                            speed_mph: coupling_speed,
                            hard,
                        },
                    ));
                }
            }

            if !session.active {
                session.active = true;
                info!(train_id = id, engineer = %session.engineer_name, symbol = %session.train_symbol, "control acquired");
                events.push(TrackerEvent::new(
                    now,
                    session.train_ref(),
                    EventKind::Acquired {
                        loco: report.loco_label(),
                    },
                ));
                if report.speed_limit_mph.trunc() == 0.0 {
                    events.push(TrackerEvent::new(
                        now,
                        session.train_ref(),
                        EventKind::ZeroSpeedLimit,
                    ));
                }
            }

            session.last_speed_mph = Some(speed);
            session.last_axle_count = Some(report.axle_count);

            let train = session.train_ref();
            events.extend(
                self.detector
                    .evaluate(&mut session.violation, sample, speed, &train),
            );
        }

        session.controller_kind = current_kind;
        events
    }

    /// Drop sessions idle for longer than `timeout`, reporting active ones.
    pub fn evict_stale(&mut self, now: DateTime<Utc>, timeout: TimeDelta) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        self.sessions.retain(|id, session| {
            let idle = now - session.last_seen;
            if idle <= timeout {
                return true;
            }
            if session.active {
                info!(train_id = *id, idle_ms = idle.num_milliseconds(), "session timed out");
                events.push(TrackerEvent::new(
                    now,
                    session.train_ref(),
                    EventKind::Timeout {
                        idle_secs: seconds_between(session.last_seen, now),
                    },
                ));
            } else {
                debug!(train_id = *id, "dropping idle non-player session");
            }
            false
        });
        events
    }

    /// Move every stored timestamp by `offset`.
    ///
    /// Used once, when the clock switches from wall-clock substitution to the
    /// feed's simulation time, so idle and confirmation timers keep their progress.
    pub fn shift_timestamps(&mut self, offset: TimeDelta) {
        for session in self.sessions.values_mut() {
            session.last_seen += offset;
            if let Some(episode) = session.violation.as_mut() {
                episode.shift(offset);
            }
        }
    }

    pub fn get(&self, id: TrainId) -> Option<&TrainSession> {
        self.sessions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.active).count()
    }

    pub fn limits(&self) -> &EffectiveLimitCalculator {
        self.detector.limits()
    }

    /// Sessions ordered by train id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.values().map(SessionSummary::from).collect();
        summaries.sort_by_key(|summary| summary.train_id);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TrainReport;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn report(kind: ControllerKind, speed: f64, axles: u32) -> TrainReport {
        TrainReport {
            id: 9,
            controller_kind: kind,
            engineer_name: "casey".into(),
            train_symbol: "M-BARLAC".into(),
            speed_mph: speed,
            speed_limit_mph: 30.0,
            axle_count: axles,
            block_id: 14002,
            railroad_initials: "ATSF".into(),
            loco_number: 812,
        }
    }

    fn at(report: TrainReport, ms: i64) -> TelemetrySample {
        TelemetrySample::stamp(report, start() + TimeDelta::milliseconds(ms))
    }

    fn table() -> SessionTable {
        SessionTable::new(
            &TrackerSettings::default(),
            EffectiveLimitCalculator::default(),
        )
    }

    fn labels(events: &[TrackerEvent]) -> Vec<&'static str> {
        events.iter().map(TrackerEvent::label).collect()
    }

    #[test]
    fn first_player_sample_acquires() {
        let mut table = table();
        let events = table.update(&at(report(ControllerKind::Player, 10.0, 40), 0));
        assert_eq!(labels(&events), vec!["acquired"]);
        match &events[0].kind {
            EventKind::Acquired { loco } => assert_eq!(loco, "ATSF 812"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(table.update(&at(report(ControllerKind::Player, 10.0, 40), 500)).is_empty());
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn ai_samples_never_acquire() {
        let mut table = table();
        assert!(table.update(&at(report(ControllerKind::Other, 60.0, 40), 0)).is_empty());
        let session = table.get(9).expect("session recorded");
        assert!(!session.active);
        assert!(session.violation.is_none());
    }

    #[test]
    fn coupling_requires_strict_axle_increase() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 4.0, 40), 0));
        assert!(table.update(&at(report(ControllerKind::Player, 4.0, 40), 500)).is_empty());
        assert!(table.update(&at(report(ControllerKind::Player, 4.0, 36), 1_000)).is_empty());

        let events = table.update(&at(report(ControllerKind::Player, 0.0, 44), 1_500));
        assert_eq!(labels(&events), vec!["coupled"]);
        match events[0].kind {
            EventKind::Coupled { speed_mph, hard } => {
                assert_eq!(speed_mph, 4.0, "pre-coupling speed");
                assert!(!hard);
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hard_coupling_is_flagged() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 9.0, 40), 0));
        let events = table.update(&at(report(ControllerKind::Player, 0.0, 48), 500));
        assert!(matches!(
            events[0].kind,
            EventKind::Coupled { hard: true, .. }
        ));
        assert!(events[0].route().alert);
    }

    #[test]
    fn relinquish_uses_sticky_identity_and_resets_state() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 40.0, 40), 0));
        let mut blank = report(ControllerKind::Player, 40.0, 40);
        blank.engineer_name.clear();
        blank.train_symbol.clear();
        table.update(&at(blank, 1_000));
        assert_eq!(
            table.get(9).expect("session").speeding_state(),
            SpeedingState::Confirming
        );

        let mut ai = report(ControllerKind::Other, 40.0, 40);
        ai.engineer_name = "AI".into();
        let events = table.update(&at(ai, 2_000));
        assert_eq!(labels(&events), vec!["relinquished"]);
        assert_eq!(events[0].train.engineer, "casey");
        assert_eq!(events[0].train.symbol, "M-BARLAC");

        let fresh = table.get(9).expect("kind remembered");
        assert!(!fresh.active);
        assert!(fresh.violation.is_none());
        assert!(fresh.last_axle_count.is_none());

        let events = table.update(&at(report(ControllerKind::Player, 40.0, 40), 3_000));
        assert_eq!(labels(&events), vec!["acquired"]);
        assert_eq!(
            table.get(9).expect("session").speeding_state(),
            SpeedingState::Confirming
        );
        assert!(
            table.update(&at(report(ControllerKind::Player, 40.0, 40), 7_000)).is_empty(),
            "confirmation restarted at re-acquisition"
        );
    }

    #[test]
    fn tiny_speeds_clamp_to_stopped() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 3.0, 40), 0));
        table.update(&at(report(ControllerKind::Player, 0.000_000_1, 40), 500));
        let session = table.get(9).expect("session");
        assert_eq!(session.last_speed_mph, Some(0.0));
        assert_eq!(session.status, MotionStatus::Stopped);
    }

    #[test]
    fn zero_posted_limit_triggers_advisory_on_acquire() {
        let mut table = table();
        let mut zero = report(ControllerKind::Player, 0.0, 40);
        zero.speed_limit_mph = 0.4;
        let events = table.update(&at(zero, 0));
        assert_eq!(labels(&events), vec!["acquired", "zero_speed_limit"]);
    }

    #[test]
    fn speed_change_messages_are_opt_in() {
        let settings = TrackerSettings {
            speed_change_messages: true,
            ..TrackerSettings::default()
        };
        let mut table = SessionTable::new(&settings, EffectiveLimitCalculator::default());
        table.update(&at(report(ControllerKind::Player, 10.0, 40), 0));
        assert!(table.update(&at(report(ControllerKind::Player, 12.0, 40), 500)).is_empty());
        let events = table.update(&at(report(ControllerKind::Player, 18.0, 40), 1_000));
        assert_eq!(labels(&events), vec!["speed_changed"]);
        let events = table.update(&at(report(ControllerKind::Player, 0.0, 40), 1_500));
        assert!(matches!(
            events[0].kind,
            EventKind::SpeedChanged {
                motion: MotionStatus::Stopped,
                ..
            }
        ));
    }

    #[test]
    fn stale_sessions_are_evicted() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 10.0, 40), 0));
        let mut ai = report(ControllerKind::Other, 10.0, 40);
        ai.id = 10;
        table.update(&at(ai, 0));

        assert!(table
            .evict_stale(start() + TimeDelta::milliseconds(2_000), TimeDelta::seconds(2))
            .is_empty());
        let events =
            table.evict_stale(start() + TimeDelta::milliseconds(2_001), TimeDelta::seconds(2));
        assert_eq!(labels(&events), vec!["timeout"]);
        assert_eq!(events[0].train.train_id, 9);
        assert!(table.is_empty());
    }

    #[test]
    fn flapping_around_the_alert_threshold_bans_once() {
        let mut table = table();
        let mut timeline = Vec::new();
        let samples = [(0, 55.0), (1_000, 34.0), (2_000, 55.0), (3_000, 34.0), (4_000, 55.0)];
        for (ms, speed) in samples {
            for event in table.update(&at(report(ControllerKind::Player, speed, 40), ms)) {
                timeline.push((ms, event.label()));
            }
        }
        assert_eq!(timeline, vec![(0, "acquired"), (0, "overspeed_ban")]);
    }

    #[test]
    fn shifted_timestamps_keep_timer_progress() {
        let mut table = table();
        table.update(&at(report(ControllerKind::Player, 40.0, 40), 0));
        table.update(&at(report(ControllerKind::Player, 40.0, 40), 3_000));

        table.shift_timestamps(TimeDelta::hours(-1));
        let session = table.get(9).expect("session");
        assert_eq!(
            session.last_seen,
            start() + TimeDelta::milliseconds(3_000) - TimeDelta::hours(1)
        );

        let rebased = start() - TimeDelta::hours(1);
        let events = table.update(&TelemetrySample::stamp(
            report(ControllerKind::Player, 40.0, 40),
            rebased + TimeDelta::milliseconds(5_000),
        ));
        assert_eq!(labels(&events), vec!["speeding_began"]);
    }
}
