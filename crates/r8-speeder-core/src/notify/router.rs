//! ---
//! r8s_section: "05-networking-external-interfaces"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Operator notification channels and delivery sinks."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::sync::Arc;

use r8_speeder_common::config::NotificationConfig;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::{Channel, NotificationSink};
use crate::events::{EventKind, TrackerEvent};

/// Logs every event and forwards its text to the channels its route names.
///
/// Sends are spawned onto the runtime and never awaited by the caller, so a
/// slow sink cannot hold up telemetry processing.
#[derive(Clone)]
pub struct NotificationRouter {
    sink: Arc<dyn NotificationSink>,
    runtime: Handle,
    alert_role: Option<String>,
    lifecycle_messages: bool,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("sink", &self.sink.name())
            .field("alert_role", &self.alert_role)
            .field("lifecycle_messages", &self.lifecycle_messages)
            .finish()
    }
}

impl NotificationRouter {
    pub fn new(sink: Arc<dyn NotificationSink>, config: &NotificationConfig, runtime: Handle) -> Self {
        Self {
            sink,
            runtime,
            alert_role: config
                .alert_role
                .as_ref()
                .map(|role| role.trim().to_owned())
                .filter(|role| !role.is_empty()),
            lifecycle_messages: config.lifecycle_messages,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Messages an event produces, as `(channel, text)` pairs.
    pub fn deliveries(&self, event: &TrackerEvent) -> Vec<(Channel, String)> {
        let route = event.route();
        let text = event.message();
        let mut out = Vec::with_capacity(2);
        if route.status && (self.lifecycle_messages || !event.is_lifecycle()) {
            out.push((Channel::Status, text.clone()));
        }
        if route.alert {
            let text = match (&event.kind, &self.alert_role) {
                (EventKind::OverspeedBan { .. }, Some(role)) => format!("<@&{role}> - {text}"),
                _ => text,
            };
            out.push((Channel::Alert, text));
        }
        out
    }

    /// Log each event and spawn its sends. Must be called without the tracker lock held.
    pub fn dispatch(&self, events: &[TrackerEvent]) {
        for event in events {
            if event.is_violation() {
                warn!(
                    event = event.label(),
                    train_id = event.train.train_id,
                    engineer = %event.train.engineer,
                    symbol = %event.train.symbol,
                    block_id = event.train.block_id,
                    "{}",
                    event.message()
                );
            } else {
                info!(
                    event = event.label(),
                    train_id = event.train.train_id,
                    block_id = event.train.block_id,
                    "{}",
                    event.message()
                );
            }
            for (channel, text) in self.deliveries(event) {
                self.spawn_send(channel, text);
            }
        }
    }

    /// Fire-and-forget a free-form message to the status channel.
    pub fn announce(&self, text: impl Into<String>) {
        self.spawn_send(Channel::Status, text.into());
    }

    fn spawn_send(&self, channel: Channel, text: String) {
        let sink = Arc::clone(&self.sink);
        self.runtime.spawn(async move {
            if let Err(err) = sink.send(channel, &text).await {
                warn!(sink = sink.name(), %channel, error = %err, "notification delivery failed");
            }
        });
    }
}
