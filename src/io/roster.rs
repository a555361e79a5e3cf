//! Student roster loaded at startup
//!
//! One JSON file mapping students to guardians and stops. Enrollment
//! changes land here out of band; a restart picks them up.

use crate::domain::types::{GuardianId, Student, StudentId, ZoneId};
use anyhow::Context;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

pub struct Roster {
    students: FxHashMap<StudentId, Student>,
}

impl Roster {
    /// Load the roster from a JSON file (an array of students)
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read roster file: {}", path.display()))?;
        let list: Vec<Student> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse roster file: {}", path.display()))?;

        let roster = Self::from_students(list);
        info!(
            students = roster.students.len(),
            active = roster.active_count(),
            file = %path.display(),
            "roster_loaded"
        );
        Ok(roster)
    }

    pub fn from_students(list: Vec<Student>) -> Self {
        let students = list.into_iter().map(|s| (s.id, s)).collect();
        Self { students }
    }

    pub fn get(&self, id: StudentId) -> Option<&Student> {
        self.students.get(&id)
    }

    pub fn is_active(&self, id: StudentId) -> bool {
        self.students.get(&id).map(|s| s.active).unwrap_or(false)
    }

    pub fn name_of(&self, id: StudentId) -> &str {
        self.students.get(&id).map(|s| s.name.as_str()).unwrap_or("unknown")
    }

    pub fn guardians_of(&self, id: StudentId) -> &[GuardianId] {
        self.students.get(&id).map(|s| s.guardians.as_slice()).unwrap_or(&[])
    }

    /// Number of active students, the roster size the trip targets derive from
    pub fn active_count(&self) -> usize {
        self.students.values().filter(|s| s.active).count()
    }

    /// Active student ids in ascending order, for stable snapshot output
    pub fn active_ids_sorted(&self) -> Vec<StudentId> {
        let mut ids: Vec<StudentId> =
            self.students.values().filter(|s| s.active).map(|s| s.id).collect();
        ids.sort_unstable_by_key(|id| id.0);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: i64, active: bool, guardians: &[i64]) -> Student {
        Student {
            id: StudentId(id),
            name: format!("Student {id}"),
            active,
            guardians: guardians.iter().map(|g| GuardianId(*g)).collect(),
            zone: None,
        }
    }

    #[test]
    fn test_active_count_skips_inactive() {
        let roster = Roster::from_students(vec![
            student(1, true, &[10]),
            student(2, true, &[20, 21]),
            student(3, false, &[30]),
        ]);
        assert_eq!(roster.active_count(), 2);
        assert!(roster.is_active(StudentId(1)));
        assert!(!roster.is_active(StudentId(3)));
        assert!(!roster.is_active(StudentId(99)));
    }

    #[test]
    fn test_active_ids_sorted() {
        let roster = Roster::from_students(vec![
            student(5, true, &[]),
            student(1, true, &[]),
            student(3, false, &[]),
        ]);
        assert_eq!(roster.active_ids_sorted(), vec![StudentId(1), StudentId(5)]);
    }

    #[test]
    fn test_guardians_of() {
        let roster = Roster::from_students(vec![student(2, true, &[20, 21])]);
        assert_eq!(roster.guardians_of(StudentId(2)), &[GuardianId(20), GuardianId(21)]);
        assert!(roster.guardians_of(StudentId(9)).is_empty());
    }

    #[test]
    fn test_parse_roster_json() {
        let json = r#"[
            {"id": 1, "name": "An", "active": true, "guardians": [100], "zone": 1},
            {"id": 2, "name": "Binh", "active": false, "guardians": []}
        ]"#;
        let list: Vec<Student> = serde_json::from_str(json).unwrap();
        let roster = Roster::from_students(list);
        assert_eq!(roster.name_of(StudentId(1)), "An");
        assert_eq!(roster.get(StudentId(1)).unwrap().zone, Some(ZoneId(1)));
        assert_eq!(roster.get(StudentId(2)).unwrap().zone, None);
        assert_eq!(roster.active_count(), 1);
    }
}
