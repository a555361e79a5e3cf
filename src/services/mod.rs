//! Core services
//!
//! - `tracker` - Single-writer attendance loop
//! - `trip_phase` - Driver-facing trip lifecycle gate
//! - `geofence` - Stop proximity evaluation
//! - `notifier` - Guardian notification dispatch

pub mod geofence;
pub mod notifier;
pub mod tracker;
pub mod trip_phase;

pub use geofence::{haversine_km, GeofenceEvaluator, ZoneTrigger};
pub use notifier::{NotificationDispatcher, NotifyContext, NotifyKind};
pub use tracker::{RecordError, Recorded, Tracker};
pub use trip_phase::{PhaseAdvance, PhaseBlocked, TripPhaseController};
