// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Webhook alerting: forwards alert-grade guardian events (circuit trips,
//! failed actions, aborted ticks) to a configured webhook endpoint. Delivery
//! is best effort; a failed post is logged and dropped, never retried into
//! the tick path.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::infrastructure::event_bus::{EventBus, EventBusError, GuardianEvent};

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Subscribe to the bus and forward alerts until cancelled.
    pub fn spawn(self, bus: &EventBus, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            info!(url = %self.url, "webhook notifier started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) if event.is_alert() => self.deliver(&event).await,
                        Ok(_) => {}
                        Err(EventBusError::Lagged(_)) => continue,
                        Err(_) => break,
                    },
                }
            }
            info!("webhook notifier stopped");
        })
    }

    async fn deliver(&self, event: &GuardianEvent) {
        let (title, message) = describe(event);
        let payload = json!({
            "text": format!("*{title}*\n{message}"),
            "event": event,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title, "alert delivered");
            }
            Ok(response) => {
                error!(status = %response.status(), title, "webhook rejected alert");
            }
            Err(err) => {
                error!(error = %err, title, "failed to deliver alert");
            }
        }
    }
}

fn describe(event: &GuardianEvent) -> (&'static str, String) {
    match event {
        GuardianEvent::CircuitTripped {
            campaign_id,
            cumulative_loss_micros,
            ..
        } => (
            "Circuit halt",
            format!(
                "Campaign {campaign_id} halted: rolling loss {:.2} over the window",
                *cumulative_loss_micros as f64 / 1_000_000.0
            ),
        ),
        GuardianEvent::ActionFailed {
            entity_id, intent, ..
        } => (
            "Action failed",
            format!(
                "{} for entity {entity_id} exhausted retries; will retry next tick",
                intent.as_str()
            ),
        ),
        GuardianEvent::TickAborted { reason, .. } => {
            ("Tick aborted", format!("Guardian tick aborted: {reason}"))
        }
        GuardianEvent::EntityStale {
            entity_id, error, ..
        } => (
            "Entity stale",
            format!("Metrics fetch failed for entity {entity_id}: {error}"),
        ),
        other => ("Guardian event", format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::CampaignId;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_alert_events_to_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let bus = EventBus::new(16);
        let cancel = CancellationToken::new();
        let notifier = WebhookNotifier::new(format!("{}/hook", server.url()));
        let handle = notifier.spawn(&bus, cancel.clone());

        bus.publish(GuardianEvent::CircuitTripped {
            campaign_id: CampaignId::new("c-1"),
            cumulative_loss_micros: 120_000_000,
            at: Utc::now(),
        });
        // Non-alert event must not be delivered.
        bus.publish(GuardianEvent::TickSkipped {
            at: Utc::now(),
            reason: "disabled".to_string(),
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = handle.await;

        mock.assert_async().await;
    }
}
