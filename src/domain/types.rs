//! Shared types for the attendance gateway

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) row id
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Today's calendar date in the device-local timezone
#[inline]
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Epoch ms of local midnight for `date`
pub fn local_midnight_ms(date: NaiveDate) -> u64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match Local.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.timestamp_millis().max(0) as u64,
        None => 0,
    }
}

/// Newtype wrapper for student ids to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StudentId(pub i64);

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for driver ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DriverId(pub i64);

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for guardian (account link) ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GuardianId(pub i64);

impl std::fmt::Display for GuardianId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for geofence zone (stop) ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ZoneId(pub i32);

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trip leg: morning pickup-to-school or afternoon school-to-home
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "go")]
    Outbound,
    #[serde(rename = "return")]
    Return,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "go",
            Direction::Return => "return",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" | "outbound" => Ok(Direction::Outbound),
            "return" => Ok(Direction::Return),
            _ => Err(()),
        }
    }
}

/// Attendance event kind as stored on the wire row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pickup,
    Dropoff,
    Absent,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Pickup => "pickup",
            EventKind::Dropoff => "dropoff",
            EventKind::Absent => "absent",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(EventKind::Pickup),
            "dropoff" => Ok(EventKind::Dropoff),
            "absent" => Ok(EventKind::Absent),
            _ => Err(()),
        }
    }
}

/// Who initiated a pickup event (only meaningful for pickups)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickupSource {
    Driver,
    Parent,
}

/// Derived per-student status, recomputed on every event arrival.
/// Never persisted; always reproducible from the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    /// Not yet boarded for the current direction
    Pending,
    /// Boarded and dropped (completed for this leg)
    Boarded,
    /// Boarded, not yet dropped
    Onboard,
    /// Marked absent for the day (terminal)
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Boarded => "boarded",
            AttendanceStatus::Onboard => "onboard",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// Phase within a direction, derived from event counts and never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripStep {
    Boarding,
    Dropping,
    Idle,
}

impl TripStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStep::Boarding => "boarding",
            TripStep::Dropping => "dropping",
            TripStep::Idle => "idle",
        }
    }
}

/// Driver-facing trip lifecycle state, manually advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    Enroute,
    ArrivedSchool,
    WaitingReturn,
    Finished,
}

impl TripPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripPhase::Enroute => "enroute",
            TripPhase::ArrivedSchool => "arrived_school",
            TripPhase::WaitingReturn => "waiting_return",
            TripPhase::Finished => "finished",
        }
    }
}

/// One row in the append-only event table.
/// Created exactly once per real-world occurrence, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: String,
    pub student_id: StudentId,
    pub driver_id: DriverId,
    pub kind: EventKind,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_source: Option<PickupSource>,
    /// Epoch milliseconds
    pub event_time: u64,
}

impl EventRow {
    pub fn new(
        student_id: StudentId,
        driver_id: DriverId,
        kind: EventKind,
        direction: Direction,
    ) -> Self {
        let pickup_source =
            if kind == EventKind::Pickup { Some(PickupSource::Driver) } else { None };
        Self {
            id: new_uuid_v7(),
            student_id,
            driver_id,
            kind,
            direction,
            pickup_source,
            event_time: epoch_ms(),
        }
    }

    /// Calendar day this row belongs to (device-local timezone)
    pub fn local_day(&self) -> NaiveDate {
        let secs = (self.event_time / 1000) as i64;
        Local
            .timestamp_opt(secs, 0)
            .earliest()
            .map(|dt| dt.date_naive())
            .unwrap_or_else(local_today)
    }
}

/// Change-data-capture operation on the event table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A change-data-capture payload delivered on the CDC channel.
/// Only inserts are consumed; update/delete rows are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<EventRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<EventRow>,
}

/// Roster entry. Read-only to this core; mutated by admin workflows elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub guardians: SmallVec<[GuardianId; 2]>,
    /// Stop where this student embarks/disembarks
    #[serde(default)]
    pub zone: Option<ZoneId>,
}

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A stop's coordinates plus trigger radius. Static reference data.
#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceZone {
    pub id: ZoneId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Falls back to the configured default when absent
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub students: SmallVec<[StudentId; 8]>,
}

impl GeofenceZone {
    pub fn position(&self) -> GeoPoint {
        GeoPoint { lat: self.lat, lon: self.lon }
    }
}

/// Bulk notification kinds a driver may broadcast to the whole roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    Emergency,
    Delay,
}

/// Driver-initiated action, arriving from the device UI or chatbot
#[derive(Debug, Clone, PartialEq)]
pub enum DriverAction {
    /// Record a pickup/dropoff/absence for a student
    Record { student_id: StudentId, kind: EventKind },
    /// Advance the trip lifecycle to the next phase
    Advance,
    /// Reload the day's events from the authoritative store
    Refresh,
    /// Fan out an emergency or delay notice to every active student
    Broadcast(BroadcastKind),
}

/// Input consumed by the tracker's single-writer loop
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Action(DriverAction),
    Change(ChangeNotification),
    Position(GeoPoint),
}
