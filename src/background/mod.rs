//! Background services: broker liveness and heartbeat supervision
//!
//! Runs as a background tokio task on its own interval, independent of the
//! publish cadence, so a recovered broker is drained even when no new
//! snapshots arrive.

pub mod connection_watchdog;

pub use connection_watchdog::{ConnectionWatchdog, WatchdogOutcome};
