//! Stratus Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - stratus-scheduler (the placement-and-consolidation engine)
//! - stratus-sim (discrete-event simulation harness and CLI)
//!
//! Key types:
//! - Cluster trait (info oracles and actuators of the simulator)
//! - Machine / VM / task snapshots and identifier types
//! - SchedulerConfig and error types

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;
