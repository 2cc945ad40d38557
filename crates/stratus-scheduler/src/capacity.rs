//! Capacity oracle
//!
//! Pure predicates and projections over the fleet model, used by placement
//! and consolidation. Nothing here mutates anything.

use std::cmp::Ordering;

use stratus_core::{Cluster, MachineId, Result, SimTime, TaskInfo, VmId};

use crate::fleet::{FleetModel, MachineStatus};

/// Integer energy efficiency: MIPS per core at P0 divided by power at S0.
pub fn efficiency(m: &MachineStatus) -> u64 {
    m.base_mips / m.base_power.max(1)
}

/// The contractual machine ordering: most efficient first, ties broken by
/// tier (Active before Standby before Off), then fewer VMs, then lower id.
pub fn compare_machines(a: &MachineStatus, b: &MachineStatus) -> Ordering {
    efficiency(b)
        .cmp(&efficiency(a))
        .then(a.tier.cmp(&b.tier))
        .then(a.vm_count().cmp(&b.vm_count()))
        .then(a.id.cmp(&b.id))
}

/// Can this VM take one more task of the given shape right now?
pub fn can_host_task_on_vm(fleet: &FleetModel, vm: VmId, task: &TaskInfo) -> bool {
    let Ok(v) = fleet.vm(vm) else { return false };
    v.vm_type == task.required_vm
        && v.cpu == task.required_cpu
        && v.task_count() < fleet.config().max_tasks_per_vm
        && !v.is_migrating
}

/// Can a new VM carrying this task be created on the machine?
pub fn can_create_vm_on(fleet: &FleetModel, machine: MachineId, task_memory: u64) -> bool {
    let Ok(m) = fleet.machine(machine) else {
        return false;
    };
    m.vm_count() < fleet.config().max_vm_per_machine
        && m.memory_free() >= fleet.config().vm_memory_overhead + task_memory
}

/// Can the machine receive this whole VM (family, memory, VM count), with
/// no state change in flight?
pub fn can_machine_host_vm(fleet: &FleetModel, machine: MachineId, vm: VmId) -> bool {
    let (Ok(m), Ok(v)) = (fleet.machine(machine), fleet.vm(vm)) else {
        return false;
    };
    m.cpu == v.cpu
        && !m.changing_state
        && m.vm_count() < fleet.config().max_vm_per_machine
        && m.memory_free() >= fleet.config().vm_memory_overhead + v.memory_committed
}

/// Instruction demand rate of a task over its arrival-to-target budget,
/// in MIPS (instructions per microsecond).
pub fn task_demand_mips(task: &TaskInfo) -> f64 {
    let budget = task.budget();
    if budget == 0 {
        // Already past target: any demand saturates the machine.
        return f64::INFINITY;
    }
    task.remaining_instructions as f64 / budget as f64
}

/// Instruction capacity of the machine at its current performance state,
/// in MIPS across all cores.
pub fn machine_capacity_mips<C: Cluster + ?Sized>(
    cluster: &C,
    machine: MachineId,
) -> Result<f64> {
    let info = cluster.machine_info(machine)?;
    Ok((info.mips_at(info.p_state) * info.num_cpus as u64) as f64)
}

/// Fraction of the machine's instruction budget consumed by its current
/// task set. Zero-capacity machines report saturated when loaded.
pub fn utilization<C: Cluster + ?Sized>(
    fleet: &FleetModel,
    cluster: &C,
    machine: MachineId,
) -> Result<f64> {
    let capacity = machine_capacity_mips(cluster, machine)?;
    let mut demand = 0.0;
    for vm in fleet.machine(machine)?.vms() {
        for task in fleet.vm(vm)?.tasks() {
            demand += task_demand_mips(&cluster.task_info(task)?);
        }
    }
    if capacity <= 0.0 {
        return Ok(if demand > 0.0 { f64::INFINITY } else { 0.0 });
    }
    Ok((demand / capacity).max(0.0))
}

/// Utilization the machine would reach if the task were added.
pub fn projected_utilization<C: Cluster + ?Sized>(
    fleet: &FleetModel,
    cluster: &C,
    machine: MachineId,
    task: &TaskInfo,
) -> Result<f64> {
    let capacity = machine_capacity_mips(cluster, machine)?;
    let current = utilization(fleet, cluster, machine)?;
    if capacity <= 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(current + task_demand_mips(task) / capacity)
}

/// Combined instruction demand of every task on a VM, in MIPS.
pub fn vm_demand_mips<C: Cluster + ?Sized>(
    fleet: &FleetModel,
    cluster: &C,
    vm: VmId,
) -> Result<f64> {
    let mut demand = 0.0;
    for task in fleet.vm(vm)?.tasks() {
        demand += task_demand_mips(&cluster.task_info(task)?);
    }
    Ok(demand)
}

/// Utilization the machine would reach if the whole VM moved onto it.
pub fn projected_utilization_with_vm<C: Cluster + ?Sized>(
    fleet: &FleetModel,
    cluster: &C,
    machine: MachineId,
    vm: VmId,
) -> Result<f64> {
    let capacity = machine_capacity_mips(cluster, machine)?;
    if capacity <= 0.0 {
        return Ok(f64::INFINITY);
    }
    let current = utilization(fleet, cluster, machine)?;
    Ok(current + vm_demand_mips(fleet, cluster, vm)? / capacity)
}

/// Projected remaining run-time of a VM's task set on its current host:
/// total remaining instructions divided by the host's P0 MIPS.
pub fn vm_remaining_runtime<C: Cluster + ?Sized>(
    fleet: &FleetModel,
    cluster: &C,
    vm: VmId,
) -> Result<SimTime> {
    let v = fleet.vm(vm)?;
    let Some(host) = v.host else { return Ok(0) };
    let mips = fleet.machine(host)?.base_mips.max(1);
    let mut remaining = 0u64;
    for task in v.tasks() {
        remaining += cluster.task_info(task)?.remaining_instructions;
    }
    Ok(remaining / mips)
}
