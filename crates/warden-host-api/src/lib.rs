//! Host adapter trait interfaces for wardend
//!
//! This crate defines the capability-based interface between the enforcement
//! core and platform-specific implementations: foreground observation,
//! enforcement actions, lock-screen presentation, durable deferred wakes and
//! user-facing notices. It contains no platform code itself.

mod capabilities;
mod handle;
mod mock;
mod traits;

pub use capabilities::*;
pub use handle::*;
pub use mock::*;
pub use traits::*;
