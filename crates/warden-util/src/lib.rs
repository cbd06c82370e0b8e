//! Shared utilities for wardend
//!
//! This crate provides:
//! - The `AppId` identity type
//! - Time utilities (mockable wall clock, day keys, duration helpers)
//! - Error types
//! - A keyed debouncer for repeated UI requests
//! - Default paths for config, data, and log directories

mod debounce;
mod error;
mod ids;
mod paths;
mod time;

pub use debounce::*;
pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
