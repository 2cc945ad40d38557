//! Stratus Scheduler - placement and consolidation core
//!
//! The decision engine behind a discrete-event cluster simulator: tracks
//! the fleet and its in-flight transitions, places arriving tasks, wakes
//! and sleeps machines, consolidates VMs onto energy-efficient hosts, and
//! keeps task priorities aligned with their deadlines.
//!
//! ## Architecture
//!
//! ```text
//! simulator callbacks          Scheduler (dispatcher)
//! NewTask ──────────────►  ├── PlacementEngine + retry queue
//! TaskComplete ─────────►  ├── ConsolidationEngine
//! Migration/StateChange ►  ├── PowerController (tiers)
//! PeriodicCheck ────────►  ├── PriorityController
//!                          └── FleetModel (single owner of state)
//! ```
//!
//! Everything the scheduler knows about the outside world comes through
//! the `stratus_core::Cluster` trait; everything it decides leaves through
//! the same trait's actuators. Machine state changes and VM migrations
//! complete asynchronously: the model carries `changing_state` and
//! `is_migrating` flags until the matching callback arrives.

pub mod capacity;
pub mod consolidate;
pub mod fleet;
pub mod placement;
pub mod power;
pub mod priority;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use consolidate::ConsolidationEngine;
pub use fleet::{FleetModel, MachineStatus, MigrationRoute, TaskStatus, VmStatus};
pub use placement::{PlacementEngine, PlacementOutcome};
pub use power::PowerController;
pub use priority::PriorityController;
pub use scheduler::{FinalReport, Scheduler, SchedulerStats};
