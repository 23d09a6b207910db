use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{customer_channel, Appointment, AppointmentStatus, ChatMessage};

pub const APPOINTMENT_UPDATED: &str = "appointment_updated";
pub const CHAT_MESSAGE: &str = "message";

/// Outbound event addressed to one channel key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub key: String,
    pub event: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, key: &str, event: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// In-process fan-out feeding the SSE stream.
pub struct BroadcastChannel {
    tx: broadcast::Sender<ChannelEvent>,
}

impl BroadcastChannel {
    pub fn new(tx: broadcast::Sender<ChannelEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationChannel for BroadcastChannel {
    async fn publish(&self, key: &str, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        // No subscribers is fine
        let _ = self.tx.send(ChannelEvent {
            key: key.to_string(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Posts each event as JSON to an external relay.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn publish(&self, key: &str, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let body = ChannelEvent {
            key: key.to_string(),
            event: event.to_string(),
            payload,
        };

        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("failed to deliver notification webhook")?
            .error_for_status()
            .context("notification webhook returned error")?;

        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusNotice {
    pub appointment_id: String,
    pub status: AppointmentStatus,
    pub service: String,
    pub note: Option<String>,
}

/// Best effort: a delivery failure is logged and never reaches the caller.
async fn emit(channel: &dyn NotificationChannel, key: String, event: &str, payload: serde_json::Value) {
    if let Err(e) = channel.publish(&key, event, payload).await {
        tracing::warn!(error = %e, key = %key, event, "notification delivery failed");
    }
}

pub async fn emit_status_change(
    channel: &dyn NotificationChannel,
    appt: &Appointment,
    note: Option<String>,
) {
    let notice = StatusNotice {
        appointment_id: appt.id.clone(),
        status: appt.status,
        service: appt.service.clone(),
        note,
    };
    let payload = match serde_json::to_value(&notice) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode status notice");
            return;
        }
    };
    emit(channel, customer_channel(&appt.customer_id), APPOINTMENT_UPDATED, payload).await;
}

pub async fn emit_chat_message(channel: &dyn NotificationChannel, msg: &ChatMessage) {
    match serde_json::to_value(msg) {
        Ok(payload) => emit(channel, msg.room_id.clone(), CHAT_MESSAGE, payload).await,
        Err(e) => tracing::warn!(error = %e, "failed to encode chat message"),
    }
}
