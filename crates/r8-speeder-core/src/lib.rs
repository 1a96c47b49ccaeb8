//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Train session tracking and speed rule enforcement."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
//! Per-train session tracking, speed violation detection, and operator
//! notification routing for the R8 Speeder daemon.

pub mod events;
pub mod limits;
pub mod notify;
pub mod reaper;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod tracker;
pub mod violation;

pub use events::{EventKind, Route, TrackerEvent, TrainRef};
pub use limits::EffectiveLimitCalculator;
pub use notify::{
    Channel, LogSink, NotificationError, NotificationRouter, NotificationSink, RecordingSink,
    WebhookSink,
};
pub use reaper::{spawn_reaper, StaleSessionReaper};
pub use session::{MotionStatus, SessionSummary, SessionTable, TrainSession};
pub use settings::TrackerSettings;
pub use telemetry::{ControllerKind, TelemetrySample, TrainId, TrainReport};
pub use tracker::SpeedTracker;
pub use violation::{SpeedingEpisode, SpeedingState, ViolationDetector};
