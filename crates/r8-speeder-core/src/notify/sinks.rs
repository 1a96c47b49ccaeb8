//! ---
//! r8s_section: "05-networking-external-interfaces"
//! r8s_subsection: "module"
//! r8s_type: "source"
//! r8s_scope: "code"
//! r8s_description: "Operator notification channels and delivery sinks."
//! r8s_version: "v0.1.0"
//! r8s_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use r8_speeder_common::config::NotificationConfig;
use reqwest::Client;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{Channel, NotificationError, NotificationSink};

/// Writes notifications to the log only. Used when no webhooks are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotificationError> {
        info!(%channel, message = text, "notification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Posts `{"content": text}` to the webhook bound to each channel.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    status_url: Option<String>,
    alert_url: Option<String>,
}

impl WebhookSink {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            status_url: config.status_webhook.clone(),
            alert_url: config.alert_webhook.clone(),
        })
    }

    fn url(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Status => self.status_url.as_deref(),
            Channel::Alert => self.alert_url.as_deref(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotificationError> {
        let Some(url) = self.url(channel) else {
            debug!(%channel, "no webhook configured for channel; dropping message");
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .json(&json!({ "content": text }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected {
                channel,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Test double that records every delivery in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(Channel, String)>>,
    notify: Notify,
    delay: Option<Duration>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before recording each delivery.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Record each delivery, then report it as failed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<(Channel, String)> {
        self.deliveries.lock().clone()
    }

    pub fn on(&self, channel: Channel) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Wait until at least `count` deliveries arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(Channel, String)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let deliveries = self.deliveries.lock();
                if deliveries.len() >= count {
                    return deliveries.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.deliveries();
            }
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), NotificationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.deliveries.lock().push((channel, text.to_owned()));
        self.notify.notify_waiters();
        if self.fail {
            return Err(NotificationError::Unavailable("recording sink set to fail".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
