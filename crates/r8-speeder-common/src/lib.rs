//! ---
//! r8s_section: "01-core-functionality"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Shared primitives and utilities for the speed monitor."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
//! Shared primitives for the R8 Speeder workspace.
//! This crate exposes configuration loading, tracing initialisation, and the
//! simulation clock consumed by the tracker and the daemon.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    FeedConfig, LimitsConfig, LoadedConfig, LoggingConfig, NotificationConfig, SpeederConfig,
    TrackerConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::SimClock;
