//! School-bus attendance gateway
//!
//! Event-sourced pickup/dropoff/absence tracking for one bus. Every
//! real-world occurrence is one immutable row in an append-only event
//! table; everything a screen shows (per-student status, trip step,
//! counts) is derived from the day's rows and never stored.
//!
//! Modules:
//! - `domain` - Event rows, the attendance book, and pure derivations
//! - `io` - MQTT change feed, event store, push delivery, roster, files
//! - `services` - Tracker loop, trip phase gate, geofence, notifier
//! - `infra` - Config, metrics, embedded broker

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
