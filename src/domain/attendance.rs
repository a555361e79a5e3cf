//! Attendance day state and pure status derivation
//!
//! The book collapses the per-direction boarded/dropped/absent sets into a
//! single map keyed by student id. Folding the same events in any order
//! yields the same book (set union), so the derived status and trip step are
//! order-independent and safe to recompute after restarts or missed
//! realtime messages.

use crate::domain::types::{AttendanceStatus, Direction, EventKind, StudentId, TripStep};
use rustc_hash::FxHashMap;

#[inline]
fn dir_index(direction: Direction) -> usize {
    match direction {
        Direction::Outbound => 0,
        Direction::Return => 1,
    }
}

/// Per-student marks for one calendar day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudentDay {
    absent: bool,
    boarded: [bool; 2],
    dropped: [bool; 2],
}

impl StudentDay {
    /// Derived status for a direction. Absence is terminal for the day and
    /// takes precedence over any boarding marks.
    pub fn status(&self, direction: Direction) -> AttendanceStatus {
        if self.absent {
            return AttendanceStatus::Absent;
        }
        let d = dir_index(direction);
        match (self.boarded[d], self.dropped[d]) {
            (false, _) => AttendanceStatus::Pending,
            (true, false) => AttendanceStatus::Onboard,
            (true, true) => AttendanceStatus::Boarded,
        }
    }
}

/// Boarded/dropped totals for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionCounts {
    pub boarded: usize,
    pub dropped: usize,
}

/// The day's accumulated event marks, one entry per student seen
#[derive(Debug, Clone, Default)]
pub struct AttendanceBook {
    days: FxHashMap<StudentId, StudentDay>,
}

impl AttendanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Day-boundary reset
    pub fn clear(&mut self) {
        self.days.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Fast-path check used before attempting a store insert
    pub fn contains(&self, student: StudentId, kind: EventKind, direction: Direction) -> bool {
        let Some(day) = self.days.get(&student) else {
            return false;
        };
        let d = dir_index(direction);
        match kind {
            EventKind::Pickup => day.boarded[d],
            EventKind::Dropoff => day.dropped[d],
            EventKind::Absent => day.absent,
        }
    }

    /// Fold one event into the book. Returns false when the mark was already
    /// set (duplicate fold is a no-op).
    pub fn apply(&mut self, student: StudentId, kind: EventKind, direction: Direction) -> bool {
        let day = self.days.entry(student).or_default();
        let d = dir_index(direction);
        let slot = match kind {
            EventKind::Pickup => &mut day.boarded[d],
            EventKind::Dropoff => &mut day.dropped[d],
            EventKind::Absent => &mut day.absent,
        };
        let changed = !*slot;
        *slot = true;
        changed
    }

    pub fn is_absent(&self, student: StudentId) -> bool {
        self.days.get(&student).map(|d| d.absent).unwrap_or(false)
    }

    /// True when the student holds any boarded/dropped mark today, on either leg
    pub fn has_ride(&self, student: StudentId) -> bool {
        self.days
            .get(&student)
            .map(|d| d.boarded.iter().chain(d.dropped.iter()).any(|&m| m))
            .unwrap_or(false)
    }

    pub fn status_of(&self, student: StudentId, direction: Direction) -> AttendanceStatus {
        self.days.get(&student).copied().unwrap_or_default().status(direction)
    }

    pub fn absent_count(&self) -> usize {
        self.days.values().filter(|d| d.absent).count()
    }

    pub fn counts(&self, direction: Direction) -> DirectionCounts {
        let d = dir_index(direction);
        let mut counts = DirectionCounts::default();
        for day in self.days.values() {
            if day.absent {
                continue;
            }
            if day.boarded[d] {
                counts.boarded += 1;
            }
            if day.dropped[d] {
                counts.dropped += 1;
            }
        }
        counts
    }

    /// Expected boardings for a direction.
    ///
    /// Outbound: every active student not marked absent. Return: everyone
    /// who actually rode in is expected to ride back.
    pub fn target(&self, direction: Direction, active_count: usize) -> usize {
        match direction {
            Direction::Outbound => active_count.saturating_sub(self.absent_count()),
            Direction::Return => self.counts(Direction::Outbound).boarded,
        }
    }

    /// Recompute the trip step from counts. Never stored, so it self-heals
    /// after restarts or missed realtime messages.
    pub fn trip_step(&self, direction: Direction, active_count: usize) -> TripStep {
        let target = self.target(direction, active_count);
        let counts = self.counts(direction);
        if counts.boarded < target {
            TripStep::Boarding
        } else if counts.dropped < counts.boarded {
            TripStep::Dropping
        } else {
            TripStep::Idle
        }
    }

    /// Step-sensitive list view.
    ///
    /// Boarding: not-yet-boarded plus boarded-not-dropped (the boarding
    /// queue). Dropping: onboard students only (the drop-off queue).
    /// Idle: the full active roster. `active_ids` must be sorted by id.
    pub fn roster_view(
        &self,
        active_ids: &[StudentId],
        direction: Direction,
        step: TripStep,
    ) -> Vec<StudentId> {
        active_ids
            .iter()
            .copied()
            .filter(|&sid| {
                let status = self.status_of(sid, direction);
                match step {
                    TripStep::Boarding => {
                        matches!(status, AttendanceStatus::Pending | AttendanceStatus::Onboard)
                    }
                    TripStep::Dropping => status == AttendanceStatus::Onboard,
                    TripStep::Idle => true,
                }
            })
            .collect()
    }
}
