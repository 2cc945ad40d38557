//! Stratus Sim - discrete-event harness for the scheduler
//!
//! Implements the `stratus_core::Cluster` trait over in-memory tables and
//! drives the scheduler through the full callback protocol: arrivals,
//! completions, deferred migration and state-change acknowledgements,
//! memory and SLA warnings, and periodic checks.

pub mod cluster;
pub mod engine;
pub mod workload;

pub use cluster::{MachineSpec, SimCluster, SimEvent, TaskSpec};
pub use engine::{Engine, RunSummary};
pub use workload::{WorkloadGenerator, WorkloadSpec};
