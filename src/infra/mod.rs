//! Infrastructure modules
//!
//! - `config` - TOML configuration loading
//! - `metrics` - Lock-free counters and periodic reporting
//! - `broker` - Embedded MQTT broker

pub mod broker;
pub mod config;
pub mod metrics;

pub use config::Config;
pub use metrics::{Metrics, MetricsSummary};
