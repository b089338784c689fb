//! logharvest Agent
//!
//! The harvester: owns the configured sources and the collector connection,
//! dispatches control events and runs the supervision timers.

pub mod harvester;

pub use harvester::Harvester;
