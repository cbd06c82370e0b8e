//! Usage tracking, lock enforcement and watchdog supervision for wardend
//!
//! This crate is the heart of wardend, containing:
//! - Foreground signal reconciliation (event channel + poll fallback)
//! - Usage accumulation into durable per-app totals
//! - Limit evaluation with unlock hysteresis
//! - A typed view over the durable store
//! - Heartbeat supervision and idempotent loop restart

mod accumulator;
mod bus;
mod engine;
mod evaluator;
mod events;
mod lifecycle;
mod service;
mod signal;
mod state;
mod watchdog;

pub use accumulator::*;
pub use bus::*;
pub use engine::*;
pub use evaluator::*;
pub use events::*;
pub use lifecycle::*;
pub use service::*;
pub use signal::*;
pub use state::*;
pub use watchdog::*;
