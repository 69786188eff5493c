//! Webhook notifications for alert escalations.
//!
//! Escalations into the configured minimum level or above are posted as
//! JSON to an operator webhook. Each level has its own cooldown so a
//! flapping score cannot flood the channel.

#[cfg(feature = "notify")]
use crate::config::NotifyConfig;
use crate::core::alert::{AlertLevel, Transition};
use crate::core::recommend::Action;
use crate::snapshot::EngineSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Notification error types.
#[derive(Debug)]
pub enum NotifyError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Webhook returned an error response
    Server { status: u16, message: String },
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Config(msg) => write!(f, "Notify config error: {msg}"),
            NotifyError::Network(msg) => write!(f, "Notify network error: {msg}"),
            NotifyError::Server { status, message } => {
                write!(f, "Webhook error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for NotifyError {}

/// Payload posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub level: AlertLevel,
    pub previous: AlertLevel,
    pub score: f64,
    pub confidence: f64,
    pub factors: Vec<String>,
    pub actions: Vec<Action>,
    pub host: String,
    pub at: DateTime<Utc>,
}

impl AlertNotification {
    pub fn new(transition: &Transition, snapshot: &EngineSnapshot, host: &str) -> Self {
        Self {
            level: transition.to,
            previous: transition.from,
            score: transition.score,
            confidence: snapshot.alert.confidence,
            factors: snapshot.factors.clone(),
            actions: snapshot.actions.clone(),
            host: host.to_string(),
            at: transition.at,
        }
    }
}

/// Decides which transitions are worth a notification.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    min_level: AlertLevel,
    cooldown: Duration,
    last_sent: HashMap<AlertLevel, DateTime<Utc>>,
}

impl CooldownGate {
    pub fn new(min_level: AlertLevel, cooldown: std::time::Duration) -> Self {
        Self {
            min_level,
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::seconds(30)),
            last_sent: HashMap::new(),
        }
    }

    /// Whether to notify; records the send time when it returns true.
    pub fn admit(&mut self, transition: &Transition) -> bool {
        if !transition.is_escalation() || transition.to < self.min_level {
            return false;
        }
        let cooling = self
            .last_sent
            .get(&transition.to)
            .is_some_and(|last| transition.at - *last < self.cooldown);
        if cooling {
            return false;
        }
        self.last_sent.insert(transition.to, transition.at);
        true
    }
}

/// Posts notifications to the configured webhook.
#[cfg(feature = "notify")]
pub struct WebhookNotifier {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
    host: String,
}

#[cfg(feature = "notify")]
impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| NotifyError::Config("no webhook url configured".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to create HTTP client: {e}")))?;
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(Self {
            url,
            token: config.token.clone(),
            client,
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn send(&self, notification: &AlertNotification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Forward admitted transitions to the webhook until the engine stops.
#[cfg(feature = "notify")]
pub async fn run_notifier(
    notifier: WebhookNotifier,
    mut gate: CooldownGate,
    engine: crate::runtime::EngineClient,
) {
    use tokio::sync::broadcast::error::RecvError;

    let mut transitions = engine.subscribe();
    loop {
        let transition = match transitions.recv().await {
            Ok(t) => t,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Notifier skipped {n} alert transitions");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        if !gate.admit(&transition) {
            continue;
        }

        let snapshot = engine.latest();
        let notification = AlertNotification::new(&transition, &snapshot, notifier.host());
        match notifier.send(&notification).await {
            Ok(()) => tracing::info!("Sent {} notification", transition.to),
            Err(e) => tracing::warn!("Failed to send notification: {e}"),
        }
    }
}
