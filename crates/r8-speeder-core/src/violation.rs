//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
//! Speeding state machine for a single player session.
//!
//! ```text
//! Normal --above alert--> Confirming --held for confirmation delay--> Speeding
//!   ^                          |                                         |
//!   +------ not above alert ---+                                         |
//!   +------------------ below alert threshold - hysteresis --------------+
//! ```
//!
//! Overspeed bans bypass the confirmation delay; sustained bans need a confirmed
//! episode. Each ban is issued at most once per episode. Dropping under the alert
//! threshold before confirmation restarts the timer but keeps an issued overspeed
//! ban latched until the episode is cleared or the session ends.

use chrono::{DateTime, TimeDelta, Utc};
use r8_speeder_common::time::seconds_between;
use serde::Serialize;
use tracing::debug;

use crate::events::{EventKind, TrackerEvent, TrainRef};
use crate::limits::EffectiveLimitCalculator;
use crate::settings::TrackerSettings;
use crate::telemetry::TelemetrySample;

/// Where a session sits in the speeding state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedingState {
    Normal,
    Confirming,
    Speeding,
}

impl SpeedingState {
    pub fn of(episode: Option<&SpeedingEpisode>) -> Self {
        episode.map_or(SpeedingState::Normal, SpeedingEpisode::state)
    }
}

/// A speeding excursion, from first exceeding the alert threshold until cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedingEpisode {
    pub confirm_start: Option<DateTime<Utc>>,
    pub confirmed_start: Option<DateTime<Utc>>,
    pub max_overspeed_mph: f64,
    pub overspeed_ban_issued: bool,
    pub sustained_ban_issued: bool,
}

impl SpeedingEpisode {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_start.is_some()
    }

    pub fn state(&self) -> SpeedingState {
        if self.is_confirmed() {
            SpeedingState::Speeding
        } else if self.confirm_start.is_some() {
            SpeedingState::Confirming
        } else {
            SpeedingState::Normal
        }
    }

    fn confirm(&mut self, now: DateTime<Utc>) {
        if self.confirmed_start.is_none() {
            self.confirmed_start = Some(now);
            self.max_overspeed_mph = 0.0;
            self.sustained_ban_issued = false;
        }
    }

    pub(crate) fn shift(&mut self, offset: TimeDelta) {
        if let Some(at) = self.confirm_start.as_mut() {
            *at += offset;
        }
        if let Some(at) = self.confirmed_start.as_mut() {
            *at += offset;
        }
    }

    fn escalated(&self) -> bool {
        self.overspeed_ban_issued || self.sustained_ban_issued
    }
}

#[derive(Debug, Clone)]
pub struct ViolationDetector {
    limits: EffectiveLimitCalculator,
    alert_margin_mph: f64,
    over_margin_mph: f64,
    hysteresis_mph: f64,
    confirmation_delay: TimeDelta,
    sustained_duration: TimeDelta,
}

impl ViolationDetector {
    pub fn new(limits: EffectiveLimitCalculator, settings: &TrackerSettings) -> Self {
        Self {
            limits,
            alert_margin_mph: settings.alert_margin_mph,
            over_margin_mph: settings.over_margin_mph,
            hysteresis_mph: settings.hysteresis_mph,
            confirmation_delay: settings.confirmation_delay,
            sustained_duration: settings.sustained_duration,
        }
    }

    pub fn limits(&self) -> &EffectiveLimitCalculator {
        &self.limits
    }

    /// Advance `episode` with one player sample and return the events it produced.
    ///
    /// `speed_mph` is the sample speed after stop clamping.
    pub fn evaluate(
        &self,
        episode: &mut Option<SpeedingEpisode>,
        sample: &TelemetrySample,
        speed_mph: f64,
        train: &TrainRef,
    ) -> Vec<TrackerEvent> {
        let now = sample.sim_time;
        let report = &sample.report;
        let cur_abs = speed_mph.abs();
        let lim_abs = report.speed_limit_mph.abs();
        let effective = self
            .limits
            .effective_limit(lim_abs, &report.train_symbol, report.block_id);
        let alert_threshold = effective + self.alert_margin_mph;
        let above_alert = cur_abs > alert_threshold;
        let above_over = cur_abs > effective + self.over_margin_mph;

        let event = |kind| TrackerEvent::new(now, train.clone(), kind);
        let mut events = Vec::new();

        if above_alert {
            let ep = episode.get_or_insert_with(SpeedingEpisode::default);
            let confirmed_before = ep.confirmed_start;
            let exceeding_since = *ep.confirm_start.get_or_insert(now);

            match confirmed_before {
                None if now - exceeding_since >= self.confirmation_delay => {
                    ep.confirm(now);
                    debug!(
                        train_id = train.train_id,
                        speed_mph = cur_abs,
                        effective_limit_mph = effective,
                        "speeding confirmed"
                    );
                    events.push(event(EventKind::SpeedingBegan {
                        speed_mph: cur_abs,
                        posted_limit_mph: lim_abs,
                        effective_limit_mph: effective,
                    }));
                }
                None => {}
                Some(_) => {
                    ep.max_overspeed_mph = ep.max_overspeed_mph.max(cur_abs - lim_abs);
                }
            }

            if above_over && !ep.overspeed_ban_issued {
                ep.overspeed_ban_issued = true;
                events.push(event(EventKind::OverspeedBan {
                    speed_mph: cur_abs,
                    posted_limit_mph: lim_abs,
                    effective_limit_mph: effective,
                    overage_mph: cur_abs - lim_abs,
                }));
            } else if let Some(confirmed_at) = confirmed_before {
                let speeding_for = now - confirmed_at;
                if !ep.sustained_ban_issued && speeding_for > self.sustained_duration {
                    ep.sustained_ban_issued = true;
                    events.push(event(EventKind::SustainedBan {
                        speed_mph: cur_abs,
                        posted_limit_mph: lim_abs,
                        duration_secs: seconds_between(confirmed_at, now),
                    }));
                }
            }
        } else if let Some(mut ep) = episode.take() {
            ep.confirm_start = None;
            match ep.confirmed_start {
                // Only the timer resets before confirmation; an issued overspeed ban stays latched.
                None if ep.overspeed_ban_issued => *episode = Some(ep),
                None => {}
                Some(confirmed_at) if cur_abs < alert_threshold - self.hysteresis_mph => {
                    debug!(
                        train_id = train.train_id,
                        speed_mph = cur_abs,
                        max_overage_mph = ep.max_overspeed_mph,
                        "speeding cleared"
                    );
                    events.push(event(EventKind::SpeedingCleared {
                        speed_mph: cur_abs,
                        duration_secs: seconds_between(confirmed_at, now),
                        max_overage_mph: ep.max_overspeed_mph,
                        escalated: ep.escalated(),
                    }));
                }
                Some(_) => *episode = Some(ep),
            }
        }

        events
    }
}
