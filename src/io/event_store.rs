//! Append-only event table boundary
//!
//! The backing store enforces the uniqueness/exclusion constraint: at most
//! one pickup and one dropoff per (student, direction, day), and an absent
//! row excludes pickup/dropoff for that student/day. A constraint violation
//! surfaces as the named `StoreError::Duplicate` so callers depend on a
//! typed condition rather than a backend error code.

use crate::domain::types::{Direction, DriverId, EventKind, EventRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness/exclusion constraint fired: the event already exists.
    /// Callers must treat this as "already recorded", not as a failure.
    #[error("event already recorded")]
    Duplicate,
    /// Any other backend failure; surfaced to the caller unchanged.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Storage boundary for the append-only event table
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one row. Never updates or deletes.
    async fn insert(&self, row: EventRow) -> Result<EventRow, StoreError>;

    /// All rows for a driver on a calendar day, used by the refresh path
    async fn events_for_day(
        &self,
        driver: DriverId,
        day: NaiveDate,
    ) -> Result<Vec<EventRow>, StoreError>;
}

// Constraint bitmask per (student, day)
const MARK_PICKUP_GO: u8 = 1 << 0;
const MARK_DROPOFF_GO: u8 = 1 << 1;
const MARK_PICKUP_RETURN: u8 = 1 << 2;
const MARK_DROPOFF_RETURN: u8 = 1 << 3;
const MARK_ABSENT: u8 = 1 << 4;

fn mark_for(kind: EventKind, direction: Direction) -> u8 {
    match (kind, direction) {
        (EventKind::Pickup, Direction::Outbound) => MARK_PICKUP_GO,
        (EventKind::Dropoff, Direction::Outbound) => MARK_DROPOFF_GO,
        (EventKind::Pickup, Direction::Return) => MARK_PICKUP_RETURN,
        (EventKind::Dropoff, Direction::Return) => MARK_DROPOFF_RETURN,
        (EventKind::Absent, _) => MARK_ABSENT,
    }
}

const MARK_ANY_RIDE: u8 =
    MARK_PICKUP_GO | MARK_DROPOFF_GO | MARK_PICKUP_RETURN | MARK_DROPOFF_RETURN;

#[derive(Default)]
struct Inner {
    rows: Vec<EventRow>,
    marks: FxHashMap<(i64, NaiveDate), u8>,
    fail_next: bool,
}

/// In-memory event table standing in for the backing database.
/// Carries the same uniqueness/exclusion constraint.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted rows
    pub fn row_count(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// Snapshot of all rows, oldest first
    pub fn rows(&self) -> Vec<EventRow> {
        self.inner.lock().rows.clone()
    }

    /// Make the next insert fail with `Unavailable`, for error-path tests
    #[cfg(test)]
    pub fn fail_next(&self) {
        self.inner.lock().fail_next = true;
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, row: EventRow) -> Result<EventRow, StoreError> {
        let mut inner = self.inner.lock();

        if inner.fail_next {
            inner.fail_next = false;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let key = (row.student_id.0, row.local_day());
        let mark = mark_for(row.kind, row.direction);
        let existing = inner.marks.get(&key).copied().unwrap_or(0);

        let conflict = match row.kind {
            // An absent row excludes pickup/dropoff for the day, and vice versa
            EventKind::Absent => existing & (MARK_ABSENT | MARK_ANY_RIDE) != 0,
            _ => existing & (mark | MARK_ABSENT) != 0,
        };
        if conflict {
            debug!(
                student_id = %row.student_id,
                kind = %row.kind.as_str(),
                direction = %row.direction.as_str(),
                "event_insert_conflict"
            );
            return Err(StoreError::Duplicate);
        }

        inner.marks.insert(key, existing | mark);
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn events_for_day(
        &self,
        driver: DriverId,
        day: NaiveDate,
    ) -> Result<Vec<EventRow>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.driver_id == driver && r.local_day() == day)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{local_today, StudentId};

    fn row(student: i64, kind: EventKind, direction: Direction) -> EventRow {
        EventRow::new(StudentId(student), DriverId(1), kind, direction)
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = MemoryEventStore::new();
        store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap();
        store.insert(row(2, EventKind::Pickup, Direction::Outbound)).await.unwrap();

        let rows = store.events_for_day(DriverId(1), local_today()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(store.events_for_day(DriverId(2), local_today()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pickup_conflicts() {
        let store = MemoryEventStore::new();
        store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap();

        let err = store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_same_kind_different_direction_allowed() {
        let store = MemoryEventStore::new();
        store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap();
        store.insert(row(1, EventKind::Dropoff, Direction::Outbound)).await.unwrap();
        store.insert(row(1, EventKind::Pickup, Direction::Return)).await.unwrap();
        store.insert(row(1, EventKind::Dropoff, Direction::Return)).await.unwrap();
        assert_eq!(store.row_count(), 4);
    }

    #[tokio::test]
    async fn test_absent_excludes_rides_both_ways() {
        let store = MemoryEventStore::new();
        store.insert(row(1, EventKind::Absent, Direction::Outbound)).await.unwrap();

        let err = store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        // And a ride row blocks a later absent row
        store.insert(row(2, EventKind::Pickup, Direction::Outbound)).await.unwrap();
        let err = store.insert(row(2, EventKind::Absent, Direction::Outbound)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_duplicate() {
        let store = MemoryEventStore::new();
        store.fail_next();
        let err = store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.row_count(), 0);

        // Next insert succeeds
        store.insert(row(1, EventKind::Pickup, Direction::Outbound)).await.unwrap();
        assert_eq!(store.row_count(), 1);
    }
}
