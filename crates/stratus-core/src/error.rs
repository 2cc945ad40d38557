//! Error types for Stratus

use thiserror::Error;

use crate::types::{MachineId, TaskId, VmId};

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur in the scheduler core
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Machine id unknown to the cluster or the fleet model
    #[error("machine {0} not found")]
    MachineNotFound(MachineId),

    /// VM id unknown to the cluster or the fleet model
    #[error("vm {0} not found")]
    VmNotFound(VmId),

    /// Task id unknown to the cluster or the fleet model
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// The VM is mid-migration and cannot accept work or move again
    #[error("vm {0} is migrating")]
    VmMigrating(VmId),

    /// The machine has a state change in flight
    #[error("machine {0} is changing state")]
    MachineChangingState(MachineId),

    /// CPU family of a task, VM, or machine does not match its counterpart
    #[error("cpu family mismatch: required {required}, found {found}")]
    CpuMismatch {
        required: crate::types::CpuFamily,
        found: crate::types::CpuFamily,
    },

    /// Placement or attach would exceed a capacity bound
    #[error("capacity exceeded on {0}: {1}")]
    CapacityExceeded(MachineId, String),

    /// Actuator call rejected by the cluster
    #[error("cluster rejected {op}: {reason}")]
    ClusterRejected { op: &'static str, reason: String },

    /// A fleet-model relationship does not hold; indicates a scheduler bug
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl SchedulerError {
    /// Create a capacity error
    pub fn capacity(machine: MachineId, msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(machine, msg.into())
    }

    /// Create a cluster-rejection error
    pub fn rejected(op: &'static str, reason: impl Into<String>) -> Self {
        Self::ClusterRejected {
            op,
            reason: reason.into(),
        }
    }

    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// True for callbacks that arrived for an id the core no longer knows;
    /// the dispatcher logs and ignores these.
    pub fn is_stale_id(&self) -> bool {
        matches!(
            self,
            Self::MachineNotFound(_) | Self::VmNotFound(_) | Self::TaskNotFound(_)
        )
    }
}
