//! Trip phase gate
//!
//! The driver walks the day through enroute, arrived_school, waiting_return
//! and finished. Leaving a leg is gated on the attendance book: every
//! expected student boarded and every boarded student dropped. A blocked
//! advance reports the exact shortfall so the driver sees "3 students not
//! yet picked up" instead of a generic refusal.
//!
//! The phase is the one piece of state that cannot be rederived from the
//! event table, so it is persisted to a small JSON file across restarts.

use crate::domain::attendance::AttendanceBook;
use crate::domain::types::{local_today, Direction, TripPhase};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Persisted phase state
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TripPhaseState {
    pub direction: Direction,
    pub phase: TripPhase,
    pub last_reset_date: NaiveDate,
}

impl TripPhaseState {
    fn fresh(today: NaiveDate) -> Self {
        Self { direction: Direction::Outbound, phase: TripPhase::Enroute, last_reset_date: today }
    }
}

/// An advance refused by the gate, with the exact shortfall
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot leave {}: {remaining} students awaiting {awaiting}", from.as_str())]
pub struct PhaseBlocked {
    pub from: TripPhase,
    pub remaining: usize,
    pub awaiting: &'static str,
}

/// A successful phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAdvance {
    pub from: TripPhase,
    pub to: TripPhase,
    /// Set when the transition completes the attendance day
    pub day_finished: bool,
}

pub struct TripPhaseController {
    state: TripPhaseState,
    path: Option<PathBuf>,
}

impl TripPhaseController {
    /// Load persisted state, or start fresh. An empty path disables
    /// persistence entirely.
    pub fn load(state_file: &str) -> Self {
        let path = (!state_file.is_empty()).then(|| PathBuf::from(state_file));

        let state = path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|contents| match serde_json::from_str::<TripPhaseState>(&contents) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(error = %e, "phase_state_corrupt");
                    None
                }
            })
            .unwrap_or_else(|| TripPhaseState::fresh(local_today()));

        info!(
            phase = %state.phase.as_str(),
            direction = %state.direction.as_str(),
            date = %state.last_reset_date,
            "phase_state_loaded"
        );
        Self { state, path }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self { state: TripPhaseState::fresh(local_today()), path: None }
    }

    pub fn phase(&self) -> TripPhase {
        self.state.phase
    }

    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    pub fn last_reset_date(&self) -> NaiveDate {
        self.state.last_reset_date
    }

    /// True when the persisted day is not today and the state must be reset
    pub fn is_stale(&self, today: NaiveDate) -> bool {
        self.state.last_reset_date != today
    }

    /// Start a fresh day
    pub fn reset_day(&mut self, today: NaiveDate) {
        self.state = TripPhaseState::fresh(today);
        self.persist();
    }

    /// Attempt a phase transition against the attendance book
    pub fn advance(
        &mut self,
        book: &AttendanceBook,
        active_count: usize,
    ) -> Result<PhaseAdvance, PhaseBlocked> {
        let from = self.state.phase;
        let advance = match from {
            TripPhase::Enroute => {
                // Everyone expected must have boarded before arriving at school
                self.check_boarding_complete(book, Direction::Outbound, active_count)?;
                self.state.phase = TripPhase::ArrivedSchool;
                PhaseAdvance { from, to: TripPhase::ArrivedSchool, day_finished: false }
            }
            TripPhase::ArrivedSchool => {
                // Everyone who boarded must be dropped at school, then the
                // direction flips to the return leg
                self.check_dropoff_complete(book, Direction::Outbound)?;
                self.state.phase = TripPhase::WaitingReturn;
                self.state.direction = Direction::Return;
                PhaseAdvance { from, to: TripPhase::WaitingReturn, day_finished: false }
            }
            TripPhase::WaitingReturn => {
                self.check_dropoff_complete(book, Direction::Return)?;
                self.state.phase = TripPhase::Finished;
                self.state.last_reset_date = local_today();
                PhaseAdvance { from, to: TripPhase::Finished, day_finished: true }
            }
            TripPhase::Finished => {
                // Advancing past finished rolls into a fresh day
                self.state = TripPhaseState::fresh(local_today());
                PhaseAdvance { from, to: TripPhase::Enroute, day_finished: false }
            }
        };

        self.persist();
        info!(from = %advance.from.as_str(), to = %advance.to.as_str(), "phase_advanced");
        Ok(advance)
    }

    fn check_boarding_complete(
        &self,
        book: &AttendanceBook,
        direction: Direction,
        active_count: usize,
    ) -> Result<(), PhaseBlocked> {
        let target = book.target(direction, active_count);
        let boarded = book.counts(direction).boarded;
        if boarded < target {
            return Err(PhaseBlocked {
                from: self.state.phase,
                remaining: target - boarded,
                awaiting: "pickup",
            });
        }
        Ok(())
    }

    fn check_dropoff_complete(
        &self,
        book: &AttendanceBook,
        direction: Direction,
    ) -> Result<(), PhaseBlocked> {
        let counts = book.counts(direction);
        if counts.dropped < counts.boarded {
            return Err(PhaseBlocked {
                from: self.state.phase,
                remaining: counts.boarded - counts.dropped,
                awaiting: "dropoff",
            });
        }
        Ok(())
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(&self.state)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, json)
        })();

        if let Err(e) = result {
            warn!(error = %e, file = %path.display(), "phase_persist_failed");
        }
    }
}
