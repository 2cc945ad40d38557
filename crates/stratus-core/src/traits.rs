//! Core traits for Stratus
//!
//! The Cluster trait defines the interface the simulator must implement.
//! The scheduler works through this interface ONLY - never concrete types.

use crate::error::Result;
use crate::types::*;

/// Everything the scheduler can observe about, or do to, the cluster.
///
/// Info methods take `&self` and return snapshots; actuator methods take
/// `&mut self` and return immediately. `migrate_vm` and `set_machine_state`
/// are asynchronous: completion is signaled later through the
/// `MigrationDone` / `StateChangeComplete` callbacks, never by polling.
pub trait Cluster {
    /// Number of machines in the fleet; machine ids are `0..machine_count()`.
    fn machine_count(&self) -> usize;

    /// Snapshot of one machine.
    fn machine_info(&self, id: MachineId) -> Result<MachineInfo>;

    /// Snapshot of one VM.
    fn vm_info(&self, id: VmId) -> Result<VmInfo>;

    /// Snapshot of one task.
    fn task_info(&self, id: TaskId) -> Result<TaskInfo>;

    /// Whether the task has violated its SLA.
    fn is_sla_violation(&self, id: TaskId) -> Result<bool>;

    /// Violation percentage for an SLA class, for the terminal report.
    fn sla_report(&self, class: SlaClass) -> f64;

    /// Total cluster energy consumed so far, in KW·h.
    fn cluster_energy_kwh(&self) -> f64;

    /// Create a VM of the given type and CPU family. The VM exists but is
    /// attached to no machine until `attach_vm`.
    fn create_vm(&mut self, vm_type: VmType, cpu: CpuFamily) -> Result<VmId>;

    /// Attach a VM to a machine.
    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<()>;

    /// Start a task on a VM at the given priority.
    fn add_task_to_vm(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<()>;

    /// Remove a task from its VM.
    fn remove_task_from_vm(&mut self, vm: VmId, task: TaskId) -> Result<()>;

    /// Begin migrating a VM to a target machine. Completion arrives later
    /// as `MigrationDone`.
    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> Result<()>;

    /// Destroy a VM. The VM must be empty.
    fn shutdown_vm(&mut self, vm: VmId) -> Result<()>;

    /// Begin a machine sleep-state transition. Completion arrives later as
    /// `StateChangeComplete`.
    fn set_machine_state(&mut self, machine: MachineId, state: SleepState) -> Result<()>;

    /// Set the performance state of one core.
    fn set_core_performance(&mut self, machine: MachineId, core: u32, p: PerfState) -> Result<()>;

    /// Rewrite a task's scheduling priority.
    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()>;
}
