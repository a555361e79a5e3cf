//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand publishes to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::{
    epoch_ms, AttendanceStatus, ChangeNotification, ChangeOp, Direction, EventRow, StudentId,
    TripPhase, TripStep,
};
use crate::infra::metrics::MetricsSummary;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Event-table change for other devices to fold (QoS 1)
    Change(ChangeNotification),
    /// Derived status snapshot for list-view UIs (QoS 0)
    Status(StatusPayload),
    /// Periodic metrics snapshot (QoS 0)
    Metrics(MetricsPayload),
}

/// One student's derived status in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StudentStatusEntry {
    pub sid: StudentId,
    pub st: AttendanceStatus,
}

/// Payload for derived status snapshots
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    /// Bus identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub direction: Direction,
    pub step: TripStep,
    pub phase: TripPhase,
    /// Step-sensitive list: the boarding queue, the drop-off queue, or the
    /// full active roster when idle
    pub queue: Vec<StudentId>,
    pub statuses: Vec<StudentStatusEntry>,
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub bus: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, bus: String) -> Self {
        Self { bus, ts: epoch_ms(), summary }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct CdcSender {
    tx: mpsc::Sender<EgressMessage>,
    bus_id: String,
}

impl CdcSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, bus_id: String) -> Self {
        Self { tx, bus_id }
    }

    /// Publish an insert on the change feed so other devices converge
    pub fn send_insert(&self, row: EventRow) {
        let change = ChangeNotification { op: ChangeOp::Insert, new: Some(row), old: None };
        let _ = self.tx.try_send(EgressMessage::Change(change));
    }

    /// Publish a derived status snapshot
    /// Injects bus_id into the payload
    pub fn send_status(&self, mut payload: StatusPayload) {
        payload.bus = Some(self.bus_id.clone());
        let _ = self.tx.try_send(EgressMessage::Status(payload));
    }

    /// Publish a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.bus_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_cdc_channel(
    buffer_size: usize,
    bus_id: String,
) -> (CdcSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (CdcSender::new(tx, bus_id), rx)
}
