//! I/O boundaries
//!
//! - `cdc` - MQTT subscriber for the change feed and driver actions
//! - `cdc_channel` - Typed channel feeding the MQTT publisher
//! - `cdc_publisher` - MQTT publisher actor
//! - `event_store` - Append-only event table boundary
//! - `push` - Guardian messaging delivery
//! - `roster` - Student roster file
//! - `location` - Bus position polling
//! - `daylog` - Day-summary JSONL log

pub mod cdc;
pub mod cdc_channel;
pub mod cdc_publisher;
pub mod daylog;
pub mod event_store;
pub mod location;
pub mod push;
pub mod roster;

pub use cdc_channel::{create_cdc_channel, CdcSender, EgressMessage, StatusPayload, StudentStatusEntry};
pub use cdc_publisher::CdcPublisher;
pub use daylog::{DayLog, DaySummary};
pub use event_store::{EventStore, MemoryEventStore, StoreError};
pub use location::LocationMonitor;
pub use push::{HttpPush, Push};
pub use roster::Roster;
