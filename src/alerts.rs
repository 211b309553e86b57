use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

/// Exchange-side state the bot could not resolve by itself, such as orders
/// that may still be resting after a failed cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub triangle_id: Option<Uuid>,
    pub reason: String,
    pub order_ids: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(triangle_id: Option<Uuid>, reason: impl Into<String>, order_ids: Vec<String>) -> Self {
        Self {
            triangle_id,
            reason: reason.into(),
            order_ids,
            raised_at: Utc::now(),
        }
    }
}

/// Escalation to a human. Fire-and-forget: never blocks the trading path.
pub trait OperatorAlert: Send + Sync {
    fn escalate(&self, alert: Alert);
}

pub struct LogAlerter;

impl OperatorAlert for LogAlerter {
    fn escalate(&self, alert: Alert) {
        error!(
            target: "alert",
            triangle = ?alert.triangle_id,
            orders = ?alert.order_ids,
            "Operator attention required: {}",
            alert.reason
        );
    }
}

/// Posts alerts as JSON to a webhook and logs them locally as well.
pub struct WebhookAlerter {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build webhook client: {}", e))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl OperatorAlert for WebhookAlerter {
    fn escalate(&self, alert: Alert) {
        LogAlerter.escalate(alert.clone());

        let http = self.http.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&alert)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(e) = result {
                warn!("Failed to deliver alert webhook: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_serializes_order_ids() {
        let id = Uuid::new_v4();
        let alert = Alert::new(Some(id), "cancellation failed", vec!["11".into(), "12".into()]);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["reason"], "cancellation failed");
        assert_eq!(json["order_ids"][1], "12");
        assert_eq!(json["triangle_id"], id.to_string());
    }
}
