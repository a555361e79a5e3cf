use super::*;
use crate::domain::types::{AttendanceStatus, DriverId, GeofenceZone, GuardianId, Student, ZoneId};
use crate::io::cdc_channel::{create_cdc_channel, EgressMessage};
use crate::io::event_store::MemoryEventStore;
use crate::io::push::testing::RecordingPush;
use smallvec::smallvec;
use std::ops::{Deref, DerefMut};

const DRIVER: i64 = 7;

fn roster_of(n: i64) -> Arc<Roster> {
    let students = (1..=n)
        .map(|id| Student {
            id: StudentId(id),
            name: format!("Student {id}"),
            active: true,
            guardians: smallvec![GuardianId(100 + id)],
            zone: None,
        })
        .collect();
    Arc::new(Roster::from_students(students))
}

/// Test harness holding the tracker plus handles to its collaborators
struct TestTracker {
    tracker: Tracker,
    store: Arc<MemoryEventStore>,
    push: Arc<RecordingPush>,
    egress_rx: mpsc::Receiver<EgressMessage>,
}

impl Deref for TestTracker {
    type Target = Tracker;
    fn deref(&self) -> &Tracker {
        &self.tracker
    }
}

impl DerefMut for TestTracker {
    fn deref_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }
}

impl TestTracker {
    fn new(roster: Arc<Roster>) -> Self {
        Self::with_config(roster, Config::default())
    }

    fn with_config(roster: Arc<Roster>, config: Config) -> Self {
        let config =
            config.with_driver_id(DRIVER).without_phase_state_file().with_daylog_file("");
        let store = Arc::new(MemoryEventStore::new());
        let push = Arc::new(RecordingPush::new());
        let (cdc_tx, egress_rx) = create_cdc_channel(64, config.bus_id().to_string());

        let tracker = Tracker::new(
            config,
            store.clone(),
            roster,
            push.clone(),
            Arc::new(Metrics::new()),
            Some(cdc_tx),
        );
        Self { tracker, store, push, egress_rx }
    }

    fn drain_egress(&mut self) -> Vec<EgressMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.egress_rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn status_of(&self, id: i64) -> AttendanceStatus {
        let direction = self.tracker.phase.direction();
        self.tracker.book.status_of(StudentId(id), direction)
    }

    async fn board_and_drop(&mut self, ids: std::ops::RangeInclusive<i64>) {
        for id in ids.clone() {
            self.record(StudentId(id), EventKind::Pickup).await.unwrap();
        }
        for id in ids {
            self.record(StudentId(id), EventKind::Dropoff).await.unwrap();
        }
    }
}

fn other_device_row(student: i64, kind: EventKind) -> EventRow {
    EventRow::new(StudentId(student), DriverId(DRIVER), kind, Direction::Outbound)
}

#[tokio::test]
async fn test_record_pickup_persists_and_notifies() {
    let mut t = TestTracker::new(roster_of(3));

    let outcome = t.record(StudentId(1), EventKind::Pickup).await.unwrap();
    assert_eq!(outcome, Recorded::Inserted);
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
    assert_eq!(t.store.row_count(), 1);

    // Guardian got the boarding message
    let messages = t.push.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, GuardianId(101));
    assert!(messages[0].1.contains("boarded"));

    // Change feed carries the insert, followed by a status snapshot
    let egress = t.drain_egress();
    assert!(matches!(&egress[0], EgressMessage::Change(c) if c.op == ChangeOp::Insert));
    assert!(matches!(
        &egress[1],
        EgressMessage::Status(s) if s.statuses[0].st == AttendanceStatus::Onboard
    ));
}

#[tokio::test]
async fn test_record_is_idempotent() {
    let mut t = TestTracker::new(roster_of(3));

    assert_eq!(t.record(StudentId(1), EventKind::Pickup).await.unwrap(), Recorded::Inserted);
    assert_eq!(
        t.record(StudentId(1), EventKind::Pickup).await.unwrap(),
        Recorded::AlreadyRecorded
    );
    assert_eq!(t.store.row_count(), 1);
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
}

#[tokio::test]
async fn test_record_converges_when_another_device_won() {
    let mut t = TestTracker::new(roster_of(3));

    // The same tap already landed via another device on this route
    t.store.insert(other_device_row(1, EventKind::Pickup)).await.unwrap();

    let outcome = t.record(StudentId(1), EventKind::Pickup).await.unwrap();
    assert_eq!(outcome, Recorded::AlreadyRecorded);
    assert_eq!(t.store.row_count(), 1);
    // The book still folds the mark locally
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
}

#[tokio::test]
async fn test_record_rejects_students_off_the_roster() {
    let mut t = TestTracker::new(roster_of(24));

    let err = t.record(StudentId(25), EventKind::Pickup).await.unwrap_err();
    assert!(matches!(err, RecordError::UnknownStudent(StudentId(25))));
    assert_eq!(t.store.row_count(), 0);
}

#[tokio::test]
async fn test_record_rejects_inactive_students() {
    let roster = Arc::new(Roster::from_students(vec![Student {
        id: StudentId(1),
        name: "Paused".to_string(),
        active: false,
        guardians: smallvec![GuardianId(101)],
        zone: None,
    }]));
    let mut t = TestTracker::new(roster);

    let err = t.record(StudentId(1), EventKind::Pickup).await.unwrap_err();
    assert!(matches!(err, RecordError::InactiveStudent(_)));
}

#[tokio::test]
async fn test_absence_blocks_later_pickup() {
    let mut t = TestTracker::new(roster_of(3));

    t.record(StudentId(2), EventKind::Absent).await.unwrap();
    assert_eq!(t.status_of(2), AttendanceStatus::Absent);

    let err = t.record(StudentId(2), EventKind::Pickup).await.unwrap_err();
    assert!(matches!(err, RecordError::AbsenceConflict(_)));
    assert_eq!(t.status_of(2), AttendanceStatus::Absent);
}

#[tokio::test]
async fn test_absence_after_ride_is_rejected() {
    let mut t = TestTracker::new(roster_of(3));

    t.record(StudentId(1), EventKind::Pickup).await.unwrap();

    // The store's exclusion constraint would fire here; validation must
    // reject first so the book never diverges from the log
    let err = t.record(StudentId(1), EventKind::Absent).await.unwrap_err();
    assert!(matches!(err, RecordError::RideConflict(StudentId(1))));
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
    assert_eq!(t.store.row_count(), 1);

    // Reloading from the store agrees with the book
    t.refresh().await;
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
}

#[tokio::test]
async fn test_store_outage_leaves_book_untouched() {
    let mut t = TestTracker::new(roster_of(3));

    t.store.fail_next();
    let err = t.record(StudentId(1), EventKind::Pickup).await.unwrap_err();
    assert!(matches!(err, RecordError::Store(StoreError::Unavailable(_))));
    assert_eq!(t.status_of(1), AttendanceStatus::Pending);
    assert_eq!(t.store.row_count(), 0);

    // The same tap works once the store is back
    t.record(StudentId(1), EventKind::Pickup).await.unwrap();
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
}

#[tokio::test]
async fn test_full_day_with_gated_advances() {
    let mut t = TestTracker::new(roster_of(24));

    for id in 1..=21 {
        t.record(StudentId(id), EventKind::Pickup).await.unwrap();
    }
    assert_eq!(t.trip_step(), TripStep::Boarding);

    // 21 of 24 boarded, the gate names the 3 missing
    let blocked = t.advance_phase().unwrap_err();
    assert_eq!(blocked.remaining, 3);
    assert_eq!(blocked.awaiting, "pickup");
    assert_eq!(t.phase.phase(), TripPhase::Enroute);

    for id in 22..=24 {
        t.record(StudentId(id), EventKind::Pickup).await.unwrap();
    }
    assert_eq!(t.trip_step(), TripStep::Dropping);

    // Boarding is complete, so arriving at school is allowed before dropoffs
    let advance = t.advance_phase().unwrap();
    assert_eq!(advance.to, TripPhase::ArrivedSchool);
    assert_eq!(t.phase.direction(), Direction::Outbound);

    // Leaving the school gate needs all 24 riders dropped
    let blocked = t.advance_phase().unwrap_err();
    assert_eq!(blocked.remaining, 24);
    assert_eq!(blocked.awaiting, "dropoff");

    for id in 1..=24 {
        t.record(StudentId(id), EventKind::Dropoff).await.unwrap();
    }
    assert_eq!(t.trip_step(), TripStep::Idle);

    t.advance_phase().unwrap();
    assert_eq!(t.phase.phase(), TripPhase::WaitingReturn);
    assert_eq!(t.phase.direction(), Direction::Return);

    t.board_and_drop(1..=24).await;
    let advance = t.advance_phase().unwrap();
    assert_eq!(advance.to, TripPhase::Finished);
    assert!(advance.day_finished);
    // The day reset emptied the book
    assert!(t.book.is_empty());
}

#[tokio::test]
async fn test_advancing_past_finished_starts_a_fresh_day() {
    let mut t = TestTracker::new(roster_of(2));

    t.board_and_drop(1..=2).await;
    t.advance_phase().unwrap(); // arrived_school
    t.advance_phase().unwrap(); // waiting_return, direction flips
    t.board_and_drop(1..=2).await;
    t.advance_phase().unwrap(); // finished, day reset fires

    let advance = t.advance_phase().unwrap();
    assert_eq!(advance.to, TripPhase::Enroute);
    assert_eq!(t.phase.direction(), Direction::Outbound);
    assert!(t.book.is_empty());
    assert_eq!(t.status_of(1), AttendanceStatus::Pending);
}

#[tokio::test]
async fn test_cdc_insert_from_sibling_device_is_folded() {
    let mut t = TestTracker::new(roster_of(3));

    let row = other_device_row(2, EventKind::Pickup);
    t.apply_change(ChangeNotification { op: ChangeOp::Insert, new: Some(row), old: None });

    assert_eq!(t.status_of(2), AttendanceStatus::Onboard);
    // Folding is not a local record: no store write, no notification
    assert_eq!(t.store.row_count(), 0);
    assert!(t.push.messages().is_empty());
}

#[tokio::test]
async fn test_cdc_discards_other_drivers_and_stale_rows() {
    let mut t = TestTracker::new(roster_of(3));

    // Another route's bus
    let mut row = other_device_row(1, EventKind::Pickup);
    row.driver_id = DriverId(99);
    t.apply_change(ChangeNotification { op: ChangeOp::Insert, new: Some(row), old: None });
    assert_eq!(t.status_of(1), AttendanceStatus::Pending);

    // Yesterday's replayed row
    let mut row = other_device_row(1, EventKind::Pickup);
    row.event_time = 1_000;
    t.apply_change(ChangeNotification { op: ChangeOp::Insert, new: Some(row), old: None });
    assert_eq!(t.status_of(1), AttendanceStatus::Pending);

    // Updates and deletes are never folded
    let row = other_device_row(1, EventKind::Pickup);
    t.apply_change(ChangeNotification { op: ChangeOp::Delete, new: None, old: Some(row) });
    assert_eq!(t.status_of(1), AttendanceStatus::Pending);
}

#[tokio::test]
async fn test_refresh_rebuilds_book_from_store() {
    let mut t = TestTracker::new(roster_of(3));

    t.store.insert(other_device_row(1, EventKind::Pickup)).await.unwrap();
    t.store.insert(other_device_row(2, EventKind::Absent)).await.unwrap();

    t.refresh().await;
    assert_eq!(t.status_of(1), AttendanceStatus::Onboard);
    assert_eq!(t.status_of(2), AttendanceStatus::Absent);
    assert_eq!(t.status_of(3), AttendanceStatus::Pending);
}

#[tokio::test]
async fn test_zone_trigger_notifies_riding_students_once() {
    let stop = GeoPoint { lat: 10.779783, lon: 106.699018 };
    let roster = Arc::new(Roster::from_students(vec![
        Student {
            id: StudentId(1),
            name: "An".to_string(),
            active: true,
            guardians: smallvec![GuardianId(101)],
            zone: Some(ZoneId(1)),
        },
        Student {
            id: StudentId(2),
            name: "Binh".to_string(),
            active: true,
            guardians: smallvec![GuardianId(102)],
            zone: Some(ZoneId(1)),
        },
    ]));
    let config = Config::default().with_zones(vec![GeofenceZone {
        id: ZoneId(1),
        name: "STOP_1".to_string(),
        lat: stop.lat,
        lon: stop.lon,
        radius_km: Some(2.0),
        students: smallvec![StudentId(1), StudentId(2)],
    }]);
    let mut t = TestTracker::with_config(roster, config);

    // Student 2 is absent, their guardian should stay quiet
    t.record(StudentId(2), EventKind::Absent).await.unwrap();
    t.push.sent.lock().clear();

    t.handle_position(stop).await;
    let messages = t.push.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, GuardianId(101));
    assert!(messages[0].1.contains("STOP_1"));

    // Second ping inside the same zone on the same day is silent
    t.handle_position(stop).await;
    assert_eq!(t.push.messages().len(), 1);
}

#[tokio::test]
async fn test_status_queue_follows_the_step() {
    let mut t = TestTracker::new(roster_of(2));

    // One of two boarded: still the boarding queue, both students shown
    t.record(StudentId(1), EventKind::Pickup).await.unwrap();
    let last_status = |msgs: Vec<EgressMessage>| {
        msgs.into_iter()
            .rev()
            .find_map(|m| match m {
                EgressMessage::Status(s) => Some(s),
                _ => None,
            })
            .unwrap()
    };
    let status = last_status(t.drain_egress());
    assert_eq!(status.step, TripStep::Boarding);
    assert_eq!(status.queue, vec![StudentId(1), StudentId(2)]);

    // Everyone boarded: the drop-off queue holds only onboard students
    t.record(StudentId(2), EventKind::Pickup).await.unwrap();
    t.record(StudentId(1), EventKind::Dropoff).await.unwrap();
    let status = last_status(t.drain_egress());
    assert_eq!(status.step, TripStep::Dropping);
    assert_eq!(status.queue, vec![StudentId(2)]);

    // Leg done: idle shows the full active roster
    t.record(StudentId(2), EventKind::Dropoff).await.unwrap();
    let status = last_status(t.drain_egress());
    assert_eq!(status.step, TripStep::Idle);
    assert_eq!(status.queue, vec![StudentId(1), StudentId(2)]);
}

#[tokio::test]
async fn test_emergency_broadcast_reaches_every_guardian() {
    let t = TestTracker::new(roster_of(5));

    t.broadcast(BroadcastKind::Emergency).await;
    let messages = t.push.messages();
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|(_, text)| text.contains("Emergency")));
}
