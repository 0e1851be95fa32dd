//! Alert delivery sinks for arrival events.
//!
//! The engine calls each sink once per allowed event and never retries; a
//! failed delivery is logged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use skywatch_core::enrich;
use skywatch_core::ArrivalEvent;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("delivery rejected with HTTP {0}")]
    Rejected(u16),
}

/// Surfaces an arrival to the user.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &ArrivalEvent) -> Result<(), NotifyError>;
}

/// Writes arrivals to the log.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &ArrivalEvent) -> Result<(), NotifyError> {
        tracing::info!(
            track = %event.track_id,
            distance_m = event.distance_m,
            "{}",
            enrich::arrival_message(event)
        );
        Ok(())
    }
}

/// POSTs arrivals as JSON to a webhook URL.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> Self {
        WebhookSink {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// JSON body sent to webhooks.
pub fn webhook_payload(event: &ArrivalEvent) -> serde_json::Value {
    serde_json::json!({
        "event_type": "entered_radius",
        "track_id": event.track_id,
        "callsign": event.track.label,
        "description": enrich::arrival_message(event),
        "distance_m": event.distance_m,
        "lat": event.track.position.map(|p| p.lat),
        "lon": event.track.position.map(|p| p.lon),
        "altitude_m": event.track.altitude_m,
        "timestamp": event.observed_at,
    })
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &ArrivalEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&webhook_payload(event))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skywatch_core::{Coordinate, Track};

    fn event() -> ArrivalEvent {
        let mut track = Track::bare("a835af");
        track.label = Some("DAL42".into());
        track.position = Some(Coordinate::new(35.5, -82.5));
        track.altitude_m = Some(3000.0);
        ArrivalEvent {
            track_id: "a835af".into(),
            distance_m: 1234.5,
            track,
            observed_at: 1700000000.0,
        }
    }

    #[test]
    fn test_webhook_sink_creation() {
        let wh = WebhookSink::new("https://example.com/hook");
        assert_eq!(wh.url, "https://example.com/hook");
        assert_eq!(wh.name(), "webhook");
    }

    #[test]
    fn test_webhook_payload() {
        let payload = webhook_payload(&event());
        assert_eq!(payload["track_id"], "a835af");
        assert_eq!(payload["callsign"], "DAL42");
        assert_eq!(payload["event_type"], "entered_radius");
        assert_eq!(payload["lat"].as_f64(), Some(35.5));
        assert!(payload["description"]
            .as_str()
            .unwrap()
            .contains("Delta Air Lines"));
    }

    #[tokio::test]
    async fn test_log_sink_succeeds() {
        assert!(LogSink.notify(&event()).await.is_ok());
    }
}
