//! Push delivery to guardian messaging accounts
//!
//! Fire-and-forget: a delivery either lands or it doesn't, and the
//! attendance record is already persisted either way. Failures are
//! logged and counted, never retried.

use crate::domain::types::GuardianId;
use crate::infra::config::Config;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Boundary for the external messaging platform
#[async_trait]
pub trait Push: Send + Sync {
    /// Deliver one message to one recipient. Returns whether it landed.
    async fn push(&self, recipient: GuardianId, message: &str) -> bool;
}

/// HTTP client for the messaging platform's send endpoint
pub struct HttpPush {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpPush {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.push_timeout_ms()))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: config.push_url().to_string(),
            token: config.push_token().map(String::from),
        }
    }
}

#[async_trait]
impl Push for HttpPush {
    async fn push(&self, recipient: GuardianId, message: &str) -> bool {
        if self.url.is_empty() {
            debug!("push_disabled");
            return false;
        }

        let body = serde_json::json!({
            "to": recipient.0,
            "text": message,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(recipient = %recipient, "push_sent");
                true
            }
            Ok(response) => {
                warn!(recipient = %recipient, status = %response.status(), "push_rejected");
                false
            }
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "push_failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records deliveries instead of sending them
    #[derive(Default)]
    pub struct RecordingPush {
        pub sent: Mutex<Vec<(GuardianId, String)>>,
        pub fail: Mutex<bool>,
    }

    impl RecordingPush {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock() = fail;
        }

        pub fn messages(&self) -> Vec<(GuardianId, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Push for RecordingPush {
        async fn push(&self, recipient: GuardianId, message: &str) -> bool {
            if *self.fail.lock() {
                return false;
            }
            self.sent.lock().push((recipient, message.to_string()));
            true
        }
    }
}
