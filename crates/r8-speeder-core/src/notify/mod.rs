//! ---
//! r8s_section: "05-networking-external-interfaces"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Operator notification channels and delivery sinks."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod router;
pub mod sinks;

pub use router::NotificationRouter;
pub use sinks::{LogSink, RecordingSink, WebhookSink};

/// Logical operator channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// General activity feed.
    Status,
    /// Violations that need moderator attention.
    Alert,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Status => f.write_str("status"),
            Channel::Alert => f.write_str("alert"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{channel} channel rejected message with status {status}")]
    Rejected { channel: Channel, status: u16 },
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Delivers rendered text to an operator channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` to `channel`. Failures are reported, never retried.
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotificationError>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}
