//! Bus position polling
//!
//! Polls the device location endpoint on a fixed interval and forwards
//! positions into the tracker channel. Zone evaluation happens in the
//! tracker so it shares the day state with everything else.

use crate::domain::types::{GeoPoint, TrackerEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct LocationMonitor {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    event_tx: mpsc::Sender<TrackerEvent>,
    metrics: Arc<Metrics>,
}

impl LocationMonitor {
    pub fn new(config: &Config, event_tx: mpsc::Sender<TrackerEvent>, metrics: Arc<Metrics>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: config.position_url().to_string(),
            interval: Duration::from_secs(config.ping_interval_secs()),
            event_tx,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, interval_secs = self.interval.as_secs(), "location_monitor_started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("location_monitor_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let Some(point) = self.fetch_position().await else {
                        continue;
                    };
                    self.metrics.record_position_ping();

                    match self.event_tx.try_send(TrackerEvent::Position(point)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // A stale position is worthless, the next tick sends a fresh one
                            self.metrics.record_channel_dropped();
                            debug!("position_dropped: channel full");
                        }
                        Err(TrySendError::Closed(_)) => {
                            warn!("tracker channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_position(&self) -> Option<GeoPoint> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "position_fetch_failed");
                return None;
            }
        };

        match response.json::<GeoPoint>().await {
            Ok(point) => Some(point),
            Err(e) => {
                warn!(error = %e, "position_parse_failed");
                None
            }
        }
    }
}
