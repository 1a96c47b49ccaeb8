//! ---
//! r8s_section: "11-simulation-test-harness"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Scenario replay feed for offline runs and tests."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
//! Replays recorded telemetry and clock updates into a speed tracker.

pub mod replay;

pub use replay::{spawn_feed, FeedError, FeedRecord, FeedStats, ReplayFeed, ScenarioRow};
