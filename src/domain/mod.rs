//! Core business types and pure derivation logic
//!
//! - `types` - Shared ids, enums and wire rows
//! - `attendance` - Day state book and status/step derivation

pub mod attendance;
pub mod types;
