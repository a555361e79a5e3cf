//! MQTT client for the change-data-capture feed and driver action intake
//!
//! Subscribes to two topics: the event-table change feed (every insert made
//! by any device on the fleet) and the driver action topic (taps from the
//! driver UI or chatbot). Both are parsed and forwarded into the tracker
//! channel via try_send so the MQTT eventloop never blocks.

use crate::domain::types::{
    BroadcastKind, ChangeNotification, DriverAction, EventKind, StudentId, TrackerEvent,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Driver action wire format
#[derive(Debug, Deserialize)]
struct ActionMessage {
    action: String,
    #[serde(default)]
    student_id: Option<i64>,
}

/// Start the MQTT client and forward parsed events to the tracker channel
pub async fn start_cdc_client(
    config: &Config,
    event_tx: mpsc::Sender<TrackerEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("attendance-cdc-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.changes_topic(), QoS::AtLeastOnce).await?;
    client.subscribe(config.actions_topic(), QoS::AtMostOnce).await?;

    info!(
        changes = %config.changes_topic(),
        actions = %config.actions_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "cdc_client_subscribed"
    );

    let changes_topic = config.changes_topic().to_string();
    let actions_topic = config.actions_topic().to_string();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("cdc_client_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = publish.topic.clone();
                        let Ok(json_str) = std::str::from_utf8(&publish.payload) else {
                            warn!(topic = %topic, "cdc_payload_not_utf8");
                            continue;
                        };

                        let event = if topic == changes_topic {
                            parse_change(json_str).map(TrackerEvent::Change)
                        } else if topic == actions_topic {
                            parse_action(json_str).map(TrackerEvent::Action)
                        } else {
                            None
                        };

                        let Some(event) = event else {
                            debug!(topic = %topic, "cdc_payload_ignored");
                            continue;
                        };

                        if let Err(e) = event_tx.try_send(event) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_channel_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("cdc_event_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("tracker channel closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("cdc_client_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Disconnects are tolerated; derivation recomputes from
                        // the latest known sets and a manual refresh always wins.
                        error!(error = %e, "cdc_client_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a change-feed payload. Non-insert and malformed rows yield None.
pub fn parse_change(json_str: &str) -> Option<ChangeNotification> {
    match serde_json::from_str::<ChangeNotification>(json_str) {
        Ok(change) => Some(change),
        Err(e) => {
            debug!(error = %e, "cdc_change_parse_failed");
            None
        }
    }
}

/// Parse a driver action payload
pub fn parse_action(json_str: &str) -> Option<DriverAction> {
    let msg: ActionMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "cdc_action_parse_failed");
            return None;
        }
    };

    match msg.action.as_str() {
        "pickup" | "dropoff" | "absent" => {
            let student_id = StudentId(msg.student_id?);
            let kind: EventKind = msg.action.parse().ok()?;
            Some(DriverAction::Record { student_id, kind })
        }
        "advance" => Some(DriverAction::Advance),
        "refresh" => Some(DriverAction::Refresh),
        "emergency" => Some(DriverAction::Broadcast(BroadcastKind::Emergency)),
        "delay" => Some(DriverAction::Broadcast(BroadcastKind::Delay)),
        other => {
            debug!(action = %other, "cdc_action_unknown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChangeOp, Direction, DriverId, EventRow};

    #[test]
    fn test_parse_change_insert() {
        let row = EventRow::new(StudentId(4), DriverId(2), EventKind::Pickup, Direction::Outbound);
        let json = serde_json::to_string(&ChangeNotification {
            op: ChangeOp::Insert,
            new: Some(row),
            old: None,
        })
        .unwrap();

        let change = parse_change(&json).unwrap();
        assert_eq!(change.op, ChangeOp::Insert);
        let row = change.new.unwrap();
        assert_eq!(row.student_id, StudentId(4));
        assert_eq!(row.kind, EventKind::Pickup);
    }

    #[test]
    fn test_parse_change_invalid_json() {
        assert!(parse_change("not json").is_none());
        assert!(parse_change("{}").is_none());
    }

    #[test]
    fn test_parse_record_actions() {
        let action = parse_action(r#"{"action":"pickup","student_id":12}"#).unwrap();
        assert_eq!(
            action,
            DriverAction::Record { student_id: StudentId(12), kind: EventKind::Pickup }
        );

        let action = parse_action(r#"{"action":"absent","student_id":3}"#).unwrap();
        assert_eq!(
            action,
            DriverAction::Record { student_id: StudentId(3), kind: EventKind::Absent }
        );
    }

    #[test]
    fn test_parse_record_action_requires_student() {
        assert!(parse_action(r#"{"action":"pickup"}"#).is_none());
    }

    #[test]
    fn test_parse_lifecycle_actions() {
        assert_eq!(parse_action(r#"{"action":"advance"}"#).unwrap(), DriverAction::Advance);
        assert_eq!(parse_action(r#"{"action":"refresh"}"#).unwrap(), DriverAction::Refresh);
        assert_eq!(
            parse_action(r#"{"action":"emergency"}"#).unwrap(),
            DriverAction::Broadcast(BroadcastKind::Emergency)
        );
        assert_eq!(
            parse_action(r#"{"action":"delay"}"#).unwrap(),
            DriverAction::Broadcast(BroadcastKind::Delay)
        );
    }

    #[test]
    fn test_parse_unknown_action() {
        assert!(parse_action(r#"{"action":"teleport","student_id":1}"#).is_none());
    }
}
