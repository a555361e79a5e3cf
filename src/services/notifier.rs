//! Guardian notification dispatch
//!
//! Resolves a student to their guardians and hands fixed-template messages
//! to the push boundary. Strictly fire-and-forget: the attendance record is
//! already persisted, so a failed delivery is counted and logged, never
//! retried and never allowed to fail the recording path.

use crate::domain::types::StudentId;
use crate::infra::metrics::Metrics;
use crate::io::push::Push;
use crate::io::roster::Roster;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Pickup,
    Dropoff,
    Proximity,
    AbsenceAlert,
    Emergency,
    Delay,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Pickup => "pickup",
            NotifyKind::Dropoff => "dropoff",
            NotifyKind::Proximity => "proximity",
            NotifyKind::AbsenceAlert => "absence_alert",
            NotifyKind::Emergency => "emergency",
            NotifyKind::Delay => "delay",
        }
    }
}

/// Extra detail for proximity messages
#[derive(Debug, Clone, Default)]
pub struct NotifyContext {
    pub stop_name: Option<String>,
    pub estimated_minutes: Option<u32>,
}

/// Outcome of a broadcast to many students
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub sent: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    push: Arc<dyn Push>,
    roster: Arc<Roster>,
    bus_id: String,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(
        push: Arc<dyn Push>,
        roster: Arc<Roster>,
        bus_id: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { push, roster, bus_id, metrics }
    }

    /// Notify one student's guardians. Returns whether every delivery landed.
    pub async fn notify(
        &self,
        student_id: StudentId,
        kind: NotifyKind,
        ctx: &NotifyContext,
    ) -> bool {
        let guardians = self.roster.guardians_of(student_id);
        if guardians.is_empty() {
            debug!(student_id = %student_id, kind = %kind.as_str(), "notify_no_guardians");
            return false;
        }

        let message = self.render(student_id, kind, ctx);
        let mut all_ok = true;
        for &guardian in guardians {
            let ok = self.push.push(guardian, &message).await;
            self.metrics.record_notification(ok);
            if ok {
                info!(
                    student_id = %student_id,
                    guardian = %guardian,
                    kind = %kind.as_str(),
                    "notification_sent"
                );
            } else {
                warn!(
                    student_id = %student_id,
                    guardian = %guardian,
                    kind = %kind.as_str(),
                    "notification_failed"
                );
                all_ok = false;
            }
        }
        all_ok
    }

    /// Notify many students concurrently, one delivery batch per student
    pub async fn notify_bulk(
        &self,
        students: &[StudentId],
        kind: NotifyKind,
        ctx: &NotifyContext,
    ) -> BulkOutcome {
        let results = futures::future::join_all(
            students.iter().map(|&sid| self.notify(sid, kind, ctx)),
        )
        .await;

        let sent = results.iter().filter(|ok| **ok).count();
        let outcome = BulkOutcome { sent, failed: results.len() - sent };
        info!(
            kind = %kind.as_str(),
            sent = outcome.sent,
            failed = outcome.failed,
            "bulk_notification_done"
        );
        outcome
    }

    fn render(
        &self,
        student_id: StudentId,
        kind: NotifyKind,
        ctx: &NotifyContext,
    ) -> String {
        let name = self.roster.name_of(student_id);
        match kind {
            NotifyKind::Pickup => format!("{name} boarded bus {}", self.bus_id),
            NotifyKind::Dropoff => format!("{name} got off bus {}", self.bus_id),
            NotifyKind::Proximity => {
                let stop = ctx.stop_name.as_deref().unwrap_or("the stop");
                let minutes = ctx.estimated_minutes.unwrap_or(1);
                format!("Bus {} is about {minutes} min from {stop}", self.bus_id)
            }
            NotifyKind::AbsenceAlert => format!("{name} is marked absent today"),
            NotifyKind::Emergency => {
                format!("Emergency on bus {}, please contact the school", self.bus_id)
            }
            NotifyKind::Delay => format!("Bus {} is running late today", self.bus_id),
        }
    }
}
