//! Webhook notifier
//!
//! One POST per event: a JSON body `{event, timestamp, data}` enriched with
//! a Slack/Discord-compatible `embeds` block. Delivery failures are logged
//! and never fatal; the keeper's behavior does not depend on the webhook.

#![allow(dead_code)]

use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Event kinds carried to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    OpportunityDetected,
    CycleCreated,
    TxSubmitted,
    TxConfirmed,
    BridgeProveReady,
    BridgeFinalizeReady,
    CycleCompleted,
    CycleFailed,
    StuckDetected,
    Error,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::OpportunityDetected => "OPPORTUNITY_DETECTED",
            NotifyEvent::CycleCreated => "CYCLE_CREATED",
            NotifyEvent::TxSubmitted => "TX_SUBMITTED",
            NotifyEvent::TxConfirmed => "TX_CONFIRMED",
            NotifyEvent::BridgeProveReady => "BRIDGE_PROVE_READY",
            NotifyEvent::BridgeFinalizeReady => "BRIDGE_FINALIZE_READY",
            NotifyEvent::CycleCompleted => "CYCLE_COMPLETED",
            NotifyEvent::CycleFailed => "CYCLE_FAILED",
            NotifyEvent::StuckDetected => "STUCK_DETECTED",
            NotifyEvent::Error => "ERROR",
        }
    }

    /// Embed accent color: green for good news, red for failures,
    /// yellow for attention.
    fn color(&self) -> u32 {
        match self {
            NotifyEvent::CycleCompleted | NotifyEvent::TxConfirmed => 0x2e_cc71,
            NotifyEvent::CycleFailed | NotifyEvent::Error => 0xe7_4c3c,
            NotifyEvent::StuckDetected => 0xf3_9c12,
            _ => 0x34_98db,
        }
    }
}

pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    /// Whether a webhook endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Send one event. Errors are swallowed after a warning.
    pub async fn notify(&self, event: NotifyEvent, data: Value) {
        let Some(url) = &self.url else {
            return;
        };

        let body = build_payload(event, &data);
        match self.client.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(event = event.as_str(), "Webhook delivered");
            }
            Ok(response) => {
                warn!(
                    event = event.as_str(),
                    status = %response.status(),
                    "Webhook rejected"
                );
            }
            Err(e) => {
                warn!(event = event.as_str(), error = %e, "Webhook delivery failed");
            }
        }
    }
}

/// The webhook body: raw event data plus a renderable embed.
fn build_payload(event: NotifyEvent, data: &Value) -> Value {
    let fields: Vec<Value> = data
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    json!({
                        "name": key,
                        "value": value_to_string(value),
                        "inline": true,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "event": event.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
        "embeds": [{
            "title": event.as_str(),
            "color": event.color(),
            "fields": fields,
        }],
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
