//! Linux host adapter for wardend
//!
//! Provides:
//! - Foreground tracking through the sway IPC (`swaymsg`)
//! - App termination by window pid or `/proc` command name
//! - Durable deferred wakes through transient systemd user timers
//! - Lock screen and notices through external commands

mod adapter;
mod notifier;
mod presenter;
mod process;
mod scheduler;
mod sway;

pub use adapter::*;
pub use notifier::*;
pub use presenter::*;
pub use process::*;
pub use scheduler::*;
pub use sway::*;
