//! MQTT publisher for egress messages
//!
//! Publishes gateway output to MQTT topics for other driver devices and
//! downstream consumers:
//! - changes topic - event-table change feed (QoS 1)
//! - status topic - derived status snapshots (QoS 0)
//! - metrics topic - periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::cdc_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct CdcPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    changes_topic: String,
    status_topic: String,
    metrics_topic: String,
}

impl CdcPublisher {
    /// Create a new publisher connected to the configured broker
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("attendance-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("cdc_publisher_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("cdc_publisher_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "cdc_publisher_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            changes_topic: config.changes_topic().to_string(),
            status_topic: config.status_topic().to_string(),
            metrics_topic: config.metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            changes = %self.changes_topic,
            status = %self.status_topic,
            metrics = %self.metrics_topic,
            "cdc_publisher_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cdc_publisher_shutdown");
                        // Drain remaining messages
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Change(change) => {
                // QoS 1: the change feed is what keeps devices consistent
                if let Ok(json) = serde_json::to_string(&change) {
                    if let Err(e) = self
                        .client
                        .publish(&self.changes_topic, QoS::AtLeastOnce, false, json.as_bytes())
                        .await
                    {
                        error!(error = %e, "cdc_publish_change_failed");
                    }
                }
            }
            EgressMessage::Status(payload) => {
                // QoS 0: snapshots are recomputed on the next change anyway
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.status_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "cdc_publish_status_failed");
                    }
                }
            }
            EgressMessage::Metrics(payload) => {
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.metrics_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "cdc_publish_metrics_failed");
                    }
                }
            }
        }
    }
}
