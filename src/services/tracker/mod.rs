//! Attendance tracker
//!
//! Single-writer loop that owns the day's attendance book. Everything that
//! mutates day state flows through one bounded channel: driver actions,
//! change-feed rows from other devices, and position pings. Because only
//! this task writes, the book needs no locking and every derivation is
//! computed from a consistent snapshot.

use crate::domain::attendance::AttendanceBook;
use crate::domain::types::{
    epoch_ms, local_midnight_ms, local_today, BroadcastKind, ChangeNotification, ChangeOp,
    Direction, DriverAction, EventKind, EventRow, GeoPoint, StudentId, TrackerEvent, TripPhase,
    TripStep,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::cdc_channel::{CdcSender, StatusPayload, StudentStatusEntry};
use crate::io::daylog::{DayLog, DaySummary};
use crate::io::event_store::{EventStore, StoreError};
use crate::io::push::Push;
use crate::io::roster::Roster;
use crate::services::geofence::GeofenceEvaluator;
use crate::services::notifier::{NotificationDispatcher, NotifyContext, NotifyKind};
use crate::services::trip_phase::{PhaseAdvance, PhaseBlocked, TripPhaseController};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Day-boundary self-heal check interval
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a record request. A duplicate is a success: the tap already
/// holds, whoever made it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    AlreadyRecorded,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown student {0}")]
    UnknownStudent(StudentId),
    #[error("student {0} is not active")]
    InactiveStudent(StudentId),
    #[error("student {0} is marked absent today")]
    AbsenceConflict(StudentId),
    #[error("student {0} already has ride events today")]
    RideConflict(StudentId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Tracker {
    config: Config,
    book: AttendanceBook,
    phase: TripPhaseController,
    geofence: GeofenceEvaluator,
    notifier: NotificationDispatcher,
    store: Arc<dyn EventStore>,
    roster: Arc<Roster>,
    metrics: Arc<Metrics>,
    cdc: Option<CdcSender>,
    daylog: Option<DayLog>,
}

impl Tracker {
    pub fn new(
        config: Config,
        store: Arc<dyn EventStore>,
        roster: Arc<Roster>,
        push: Arc<dyn Push>,
        metrics: Arc<Metrics>,
        cdc: Option<CdcSender>,
    ) -> Self {
        let geofence = GeofenceEvaluator::new(
            config.zones().to_vec(),
            config.default_radius_km(),
            config.average_speed_kmh(),
        );
        let notifier = NotificationDispatcher::new(
            push,
            roster.clone(),
            config.bus_id().to_string(),
            metrics.clone(),
        );
        let phase = TripPhaseController::load(config.phase_state_file());
        let daylog =
            (!config.daylog_file().is_empty()).then(|| DayLog::new(config.daylog_file()));

        Self {
            config,
            book: AttendanceBook::new(),
            phase,
            geofence,
            notifier,
            store,
            roster,
            metrics,
            cdc,
            daylog,
        }
    }

    /// Main loop. Consumes tracker events until shutdown.
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<TrackerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            driver_id = %self.config.driver_id(),
            active_students = self.roster.active_count(),
            phase = %self.phase.phase().as_str(),
            "tracker_started"
        );

        self.ensure_today();
        self.refresh().await;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tracker_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.ensure_today();
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.process_event(event).await,
                        None => {
                            info!("tracker_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    pub async fn process_event(&mut self, event: TrackerEvent) {
        self.ensure_today();
        match event {
            TrackerEvent::Action(DriverAction::Record { student_id, kind }) => {
                if let Err(e) = self.record(student_id, kind).await {
                    warn!(student_id = %student_id, kind = %kind.as_str(), error = %e, "record_rejected");
                }
            }
            TrackerEvent::Action(DriverAction::Advance) => {
                if let Err(blocked) = self.advance_phase() {
                    warn!(
                        phase = %blocked.from.as_str(),
                        remaining = blocked.remaining,
                        awaiting = blocked.awaiting,
                        "phase_advance_blocked"
                    );
                }
            }
            TrackerEvent::Action(DriverAction::Refresh) => {
                self.refresh().await;
            }
            TrackerEvent::Action(DriverAction::Broadcast(kind)) => {
                self.broadcast(kind).await;
            }
            TrackerEvent::Change(change) => {
                self.apply_change(change);
            }
            TrackerEvent::Position(point) => {
                self.handle_position(point).await;
            }
        }
    }

    /// Record one attendance event initiated on this device.
    ///
    /// A store-level duplicate means another device already recorded the
    /// same tap; the book is folded anyway so both converge, and the caller
    /// sees success. Any other store failure leaves the book untouched.
    pub async fn record(
        &mut self,
        student_id: StudentId,
        kind: EventKind,
    ) -> Result<Recorded, RecordError> {
        let Some(student) = self.roster.get(student_id) else {
            self.metrics.record_record_rejected();
            return Err(RecordError::UnknownStudent(student_id));
        };
        if !student.active {
            self.metrics.record_record_rejected();
            return Err(RecordError::InactiveStudent(student_id));
        }
        if kind != EventKind::Absent && self.book.is_absent(student_id) {
            self.metrics.record_record_rejected();
            return Err(RecordError::AbsenceConflict(student_id));
        }
        // The mirror of the absence rule: a student who already boarded or
        // was dropped today cannot be marked absent. Caught here so the
        // store's exclusion conflict is never mistaken for "already absent".
        if kind == EventKind::Absent && self.book.has_ride(student_id) {
            self.metrics.record_record_rejected();
            return Err(RecordError::RideConflict(student_id));
        }

        let direction = self.phase.direction();

        // Fast path: the book already holds this mark, skip the store round trip
        if self.book.contains(student_id, kind, direction) {
            self.metrics.record_duplicate_suppressed();
            debug!(student_id = %student_id, kind = %kind.as_str(), "record_already_held");
            return Ok(Recorded::AlreadyRecorded);
        }

        let row = EventRow::new(student_id, self.config.driver_id(), kind, direction);
        match self.store.insert(row).await {
            Ok(row) => {
                self.book.apply(student_id, kind, direction);
                self.metrics.record_event_recorded();
                info!(
                    student_id = %student_id,
                    kind = %kind.as_str(),
                    direction = %direction.as_str(),
                    "event_recorded"
                );

                if let Some(cdc) = &self.cdc {
                    cdc.send_insert(row);
                }
                self.dispatch_record_notification(student_id, kind).await;
                self.publish_status();
                Ok(Recorded::Inserted)
            }
            Err(StoreError::Duplicate) => {
                // Another device won the race; fold locally and move on
                self.book.apply(student_id, kind, direction);
                self.metrics.record_duplicate_suppressed();
                debug!(student_id = %student_id, kind = %kind.as_str(), "record_duplicate");
                self.publish_status();
                Ok(Recorded::AlreadyRecorded)
            }
            Err(e) => {
                error!(student_id = %student_id, error = %e, "event_store_failed");
                Err(RecordError::Store(e))
            }
        }
    }

    async fn dispatch_record_notification(&self, student_id: StudentId, kind: EventKind) {
        let notify_kind = match kind {
            EventKind::Pickup => NotifyKind::Pickup,
            EventKind::Dropoff => NotifyKind::Dropoff,
            EventKind::Absent => NotifyKind::AbsenceAlert,
        };
        self.notifier.notify(student_id, notify_kind, &NotifyContext::default()).await;
    }

    /// Fold one change-feed row from another device into the book.
    ///
    /// Only inserts from this driver's own feed for the current day are
    /// folded; everything else is discarded. Discarding is safe because the
    /// store is authoritative and a refresh always reconverges.
    pub fn apply_change(&mut self, change: ChangeNotification) {
        if change.op != ChangeOp::Insert {
            self.metrics.record_cdc_discarded();
            debug!(op = ?change.op, "cdc_op_ignored");
            return;
        }
        let Some(row) = change.new else {
            self.metrics.record_cdc_discarded();
            return;
        };
        if row.driver_id != self.config.driver_id() {
            self.metrics.record_cdc_discarded();
            debug!(driver_id = %row.driver_id, "cdc_other_driver");
            return;
        }
        if row.event_time < local_midnight_ms(local_today()) {
            self.metrics.record_cdc_discarded();
            debug!(event_time = row.event_time, "cdc_stale_row");
            return;
        }

        if self.book.apply(row.student_id, row.kind, row.direction) {
            self.metrics.record_cdc_applied();
            info!(
                student_id = %row.student_id,
                kind = %row.kind.as_str(),
                direction = %row.direction.as_str(),
                "cdc_row_applied"
            );
            self.publish_status();
        } else {
            // Already folded locally, nothing changed
            self.metrics.record_cdc_discarded();
        }
    }

    /// Attempt a trip-phase transition against the current book
    pub fn advance_phase(&mut self) -> Result<PhaseAdvance, PhaseBlocked> {
        let advance = self.phase.advance(&self.book, self.roster.active_count())?;

        if advance.day_finished {
            // End of the return trip: log the completed day, then drop the sets
            self.append_day_summary();
            self.clear_day_state();
        }
        if advance.from == TripPhase::Finished {
            // Rolled past finished into a fresh day
            self.clear_day_state();
        }
        self.publish_status();
        Ok(advance)
    }

    /// Rebuild the book from the authoritative store
    pub async fn refresh(&mut self) {
        let today = local_today();
        match self.store.events_for_day(self.config.driver_id(), today).await {
            Ok(rows) => {
                self.book.clear();
                for row in &rows {
                    self.book.apply(row.student_id, row.kind, row.direction);
                }
                info!(rows = rows.len(), "book_refreshed");
                self.publish_status();
            }
            Err(e) => {
                // Keep the current book, it is still the best local knowledge
                warn!(error = %e, "refresh_failed");
            }
        }
    }

    /// Evaluate a position ping against the stop zones
    pub async fn handle_position(&mut self, point: GeoPoint) {
        let triggers = self.geofence.evaluate(point);
        for trigger in triggers {
            self.metrics.record_geofence_trigger();
            info!(
                zone_id = %trigger.zone_id,
                stop = %trigger.stop_name,
                distance_km = format!("{:.3}", trigger.distance_km),
                eta_min = trigger.estimated_minutes,
                "zone_trigger"
            );

            let ctx = NotifyContext {
                stop_name: Some(trigger.stop_name.clone()),
                estimated_minutes: Some(trigger.estimated_minutes),
            };
            for student_id in trigger.students {
                // No point warning guardians of a student who is not riding
                if !self.roster.is_active(student_id) || self.book.is_absent(student_id) {
                    continue;
                }
                self.notifier.notify(student_id, NotifyKind::Proximity, &ctx).await;
            }
        }
    }

    /// Fan a broadcast out to every active student's guardians
    pub async fn broadcast(&self, kind: BroadcastKind) {
        let notify_kind = match kind {
            BroadcastKind::Emergency => NotifyKind::Emergency,
            BroadcastKind::Delay => NotifyKind::Delay,
        };
        let students = self.roster.active_ids_sorted();
        self.notifier.notify_bulk(&students, notify_kind, &NotifyContext::default()).await;
    }

    /// Reset day state when the persisted date is no longer today
    fn ensure_today(&mut self) {
        let today = local_today();
        if self.phase.is_stale(today) {
            info!(date = %today, "day_boundary_reset");
            self.reset_day(today);
        }
    }

    fn reset_day(&mut self, today: NaiveDate) {
        if !self.book.is_empty() {
            self.append_day_summary();
        }
        self.clear_day_state();
        self.phase.reset_day(today);
        self.publish_status();
    }

    fn clear_day_state(&mut self) {
        self.book.clear();
        self.geofence.reset_day();
    }

    fn append_day_summary(&self) {
        let Some(daylog) = &self.daylog else {
            return;
        };

        let active_ids = self.roster.active_ids_sorted();
        let direction = self.phase.direction();
        let outbound = self.book.counts(Direction::Outbound);
        let inbound = self.book.counts(Direction::Return);

        daylog.append(&DaySummary {
            bus: self.config.bus_id().to_string(),
            date: self.phase.last_reset_date(),
            phase: self.phase.phase(),
            active_students: active_ids.len(),
            absent: self.book.absent_count(),
            outbound_boarded: outbound.boarded,
            outbound_dropped: outbound.dropped,
            return_boarded: inbound.boarded,
            return_dropped: inbound.dropped,
            statuses: active_ids
                .iter()
                .map(|&sid| (sid, self.book.status_of(sid, direction)))
                .collect(),
        });
    }

    /// Current trip step, recomputed from counts
    pub fn trip_step(&self) -> TripStep {
        self.book.trip_step(self.phase.direction(), self.roster.active_count())
    }

    fn publish_status(&self) {
        let Some(cdc) = &self.cdc else {
            return;
        };

        let direction = self.phase.direction();
        let step = self.trip_step();
        let active_ids = self.roster.active_ids_sorted();
        let queue = self.book.roster_view(&active_ids, direction, step);
        let statuses = active_ids
            .into_iter()
            .map(|sid| StudentStatusEntry { sid, st: self.book.status_of(sid, direction) })
            .collect();

        cdc.send_status(StatusPayload {
            bus: None,
            ts: epoch_ms(),
            direction,
            step,
            phase: self.phase.phase(),
            queue,
            statuses,
        });
    }
}
