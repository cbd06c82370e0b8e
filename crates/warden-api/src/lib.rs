//! Protocol types for wardend
//!
//! This crate defines the vocabulary shared by the engine, host adapters and
//! the command surface:
//! - Foreground transitions and heartbeat records
//! - Commands (requests from the configuration surface) and responses
//! - Events published on the event bus
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
