//! Asynchronous webhook delivery for alert notifications

use std::collections::HashMap;

use tokio::sync::mpsc;

use super::action::AlertNotification;

/// Delivers queued notifications to the configured webhook endpoints
pub struct NotificationDispatcher {
    client: reqwest::Client,
    urls: Vec<String>,
    headers: HashMap<String, String>,
}

impl NotificationDispatcher {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            urls,
            headers: HashMap::new(),
        }
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Drain `rx` until every sender is dropped
    pub fn start(
        self,
        mut rx: mpsc::UnboundedReceiver<AlertNotification>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(endpoints = self.urls.len(), "Notification dispatcher started");

            while let Some(notification) = rx.recv().await {
                if let Err(e) = self.dispatch(&notification).await {
                    tracing::error!(
                        alert_id = %notification.alert_id,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            }

            tracing::info!("Notification dispatcher stopped");
        })
    }

    /// Send one notification to every endpoint concurrently
    pub async fn dispatch(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        let sends = self
            .urls
            .iter()
            .map(|url| self.send_webhook(url, notification));

        let errors: Vec<DispatchError> = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Multiple(errors))
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        notification: &AlertNotification,
    ) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "message": notification.message(),
            "notification": notification,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(DispatchError::Webhook(format!(
                "Webhook {} returned status {}",
                url,
                response.status()
            )));
        }

        tracing::debug!(
            alert_id = %notification.alert_id,
            url = %url,
            "Webhook notification sent"
        );

        Ok(())
    }
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple delivery failures: {0:?}")]
    Multiple(Vec<DispatchError>),
}
