//! Fleet model and transition tracker
//!
//! Process-wide view of machines, VMs, tasks, and their relationships,
//! plus the flags covering in-flight asynchronous transitions (machine
//! state changes, VM migrations). Every relationship is stored redundantly
//! (machine -> VM set, VM -> task set, task -> VM) and the mutators keep
//! all copies consistent: each either completes fully or changes nothing.
//!
//! The original design kept a file-scope machine list and a global
//! migration flag; here all of it lives behind one struct passed by
//! reference to every component.

use std::collections::{BTreeSet, HashMap};

use stratus_core::{
    Cluster, CpuFamily, MachineId, Priority, Result, SchedulerConfig, SchedulerError, SimTime,
    TaskId, Tier, VmId, VmType,
};

/// Scheduler-owned view of one machine.
///
/// Immutable hardware attributes are cached at init so capacity math does
/// not round-trip through the info oracle; live observables (sleep state,
/// oracle-side memory) are always read fresh.
#[derive(Debug, Clone)]
pub struct MachineStatus {
    pub id: MachineId,
    pub cpu: CpuFamily,
    pub num_cpus: u32,
    pub memory_capacity: u64,
    /// MIPS per core at P0.
    pub base_mips: u64,
    /// Power draw in watts at S0.
    pub base_power: u64,
    pub gpus: bool,
    pub tier: Tier,
    /// A `set_machine_state` call is in flight; cleared by
    /// `StateChangeComplete`.
    pub changing_state: bool,
    pub(crate) inbound_migrations: u32,
    pub(crate) vms: BTreeSet<VmId>,
    /// Task memory plus per-VM overhead committed on this machine.
    pub memory_committed: u64,
}

impl MachineStatus {
    /// VMs currently attached (including migration sinks' optimistic
    /// attachments).
    pub fn vms(&self) -> impl Iterator<Item = VmId> + '_ {
        self.vms.iter().copied()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// True while at least one migration targets this machine.
    pub fn has_inbound_migrations(&self) -> bool {
        self.inbound_migrations > 0
    }

    /// Memory still unreserved on this machine.
    pub fn memory_free(&self) -> u64 {
        self.memory_capacity.saturating_sub(self.memory_committed)
    }
}

/// Scheduler-owned view of one VM.
#[derive(Debug, Clone)]
pub struct VmStatus {
    pub id: VmId,
    pub vm_type: VmType,
    pub cpu: CpuFamily,
    /// Host machine; `None` only between creation and first attach.
    pub host: Option<MachineId>,
    /// Migration issued and not yet completed; the VM accepts no new tasks
    /// and is not chosen as a migration source.
    pub is_migrating: bool,
    pub(crate) tasks: BTreeSet<TaskId>,
    /// Total memory of the tasks on this VM (overhead excluded).
    pub memory_committed: u64,
}

impl VmStatus {
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().copied()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Scheduler-owned view of one task; immutable requirements cached from
/// the oracle at admission.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub id: TaskId,
    pub vm: VmId,
    pub required_cpu: CpuFamily,
    pub required_vm: VmType,
    pub memory: u64,
    pub arrival: SimTime,
    pub target_completion: SimTime,
    pub total_instructions: u64,
    pub gpu_capable: bool,
    /// Last priority written through the actuator.
    pub priority: Priority,
}

/// Source and sink of an in-flight VM migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRoute {
    pub source: MachineId,
    pub sink: MachineId,
}

/// The fleet model: exclusive owner of all machine/VM/task records.
#[derive(Debug)]
pub struct FleetModel {
    machines: Vec<MachineStatus>,
    vms: HashMap<VmId, VmStatus>,
    tasks: HashMap<TaskId, TaskStatus>,
    migrations: HashMap<VmId, MigrationRoute>,
    cfg: SchedulerConfig,
}

impl FleetModel {
    /// Build the model from the cluster's machine catalog. Machines start
    /// in the Active tier; the power controller applies the initial split.
    pub fn from_cluster<C: Cluster + ?Sized>(cluster: &C, cfg: &SchedulerConfig) -> Result<Self> {
        let mut machines = Vec::with_capacity(cluster.machine_count());
        for i in 0..cluster.machine_count() {
            let info = cluster.machine_info(MachineId(i))?;
            machines.push(MachineStatus {
                id: info.id,
                cpu: info.cpu,
                num_cpus: info.num_cpus,
                memory_capacity: info.memory_size,
                base_mips: info.mips_at(stratus_core::PerfState::P0),
                base_power: info.power_at(stratus_core::SleepState::S0),
                gpus: info.gpus,
                tier: Tier::Active,
                changing_state: false,
                inbound_migrations: 0,
                vms: BTreeSet::new(),
                memory_committed: 0,
            });
        }
        Ok(Self {
            machines,
            vms: HashMap::new(),
            tasks: HashMap::new(),
            migrations: HashMap::new(),
            cfg: cfg.clone(),
        })
    }

    // ---- lookups ----

    pub fn machine(&self, id: MachineId) -> Result<&MachineStatus> {
        self.machines
            .get(id.0)
            .ok_or(SchedulerError::MachineNotFound(id))
    }

    fn machine_mut(&mut self, id: MachineId) -> Result<&mut MachineStatus> {
        self.machines
            .get_mut(id.0)
            .ok_or(SchedulerError::MachineNotFound(id))
    }

    pub fn vm(&self, id: VmId) -> Result<&VmStatus> {
        self.vms.get(&id).ok_or(SchedulerError::VmNotFound(id))
    }

    fn vm_mut(&mut self, id: VmId) -> Result<&mut VmStatus> {
        self.vms.get_mut(&id).ok_or(SchedulerError::VmNotFound(id))
    }

    pub fn task(&self, id: TaskId) -> Result<&TaskStatus> {
        self.tasks.get(&id).ok_or(SchedulerError::TaskNotFound(id))
    }

    pub fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn machines(&self) -> impl Iterator<Item = &MachineStatus> {
        self.machines.iter()
    }

    pub fn machines_of_family(
        &self,
        family: CpuFamily,
    ) -> impl Iterator<Item = &MachineStatus> + '_ {
        self.machines.iter().filter(move |m| m.cpu == family)
    }

    pub fn vms(&self) -> impl Iterator<Item = &VmStatus> {
        self.vms.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskStatus> {
        self.tasks.values()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    // ---- mutators ----

    /// Record a freshly created, not-yet-attached VM.
    pub fn register_vm(&mut self, id: VmId, vm_type: VmType, cpu: CpuFamily) -> Result<()> {
        if self.vms.contains_key(&id) {
            return Err(SchedulerError::invariant(format!(
                "vm {id} registered twice"
            )));
        }
        self.vms.insert(
            id,
            VmStatus {
                id,
                vm_type,
                cpu,
                host: None,
                is_migrating: false,
                tasks: BTreeSet::new(),
                memory_committed: 0,
            },
        );
        Ok(())
    }

    /// Attach a detached VM to a machine, reserving its overhead and task
    /// memory there.
    pub fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        let overhead = self.cfg.vm_memory_overhead;
        let max_vms = self.cfg.max_vm_per_machine;
        let (vm_cpu, vm_mem, host) = {
            let v = self.vm(vm)?;
            (v.cpu, v.memory_committed, v.host)
        };
        if host.is_some() {
            return Err(SchedulerError::invariant(format!(
                "vm {vm} attached while already hosted"
            )));
        }
        let m = self.machine(machine)?;
        if m.cpu != vm_cpu {
            return Err(SchedulerError::CpuMismatch {
                required: vm_cpu,
                found: m.cpu,
            });
        }
        if m.vm_count() >= max_vms {
            return Err(SchedulerError::capacity(machine, "vm count at limit"));
        }
        if m.memory_committed + overhead + vm_mem > m.memory_capacity {
            return Err(SchedulerError::capacity(machine, "insufficient memory"));
        }

        let m = self.machine_mut(machine)?;
        m.vms.insert(vm);
        m.memory_committed += overhead + vm_mem;
        self.vm_mut(vm)?.host = Some(machine);
        Ok(())
    }

    /// Detach a VM from the machine it is hosted on, releasing its memory
    /// reservation. The VM record survives, detached.
    pub fn detach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        let overhead = self.cfg.vm_memory_overhead;
        let vm_mem = {
            let v = self.vm(vm)?;
            if v.host != Some(machine) {
                return Err(SchedulerError::invariant(format!(
                    "vm {vm} is not hosted on {machine}"
                )));
            }
            v.memory_committed
        };
        let m = self.machine_mut(machine)?;
        m.vms.remove(&vm);
        m.memory_committed = m.memory_committed.saturating_sub(overhead + vm_mem);
        self.vm_mut(vm)?.host = None;
        Ok(())
    }

    /// Drop a detached, empty VM record entirely.
    pub fn remove_vm(&mut self, vm: VmId) -> Result<()> {
        let v = self.vm(vm)?;
        if v.host.is_some() || !v.is_empty() {
            return Err(SchedulerError::invariant(format!(
                "vm {vm} removed while attached or occupied"
            )));
        }
        self.vms.remove(&vm);
        Ok(())
    }

    /// Bind a task to a VM, updating the VM's task set and the host
    /// machine's memory reservation.
    pub fn assign_task(&mut self, task: TaskStatus, vm: VmId) -> Result<()> {
        let max_tasks = self.cfg.max_tasks_per_vm;
        if self.tasks.contains_key(&task.id) {
            return Err(SchedulerError::invariant(format!(
                "task {} assigned twice",
                task.id
            )));
        }
        let (host, migrating, task_count, vm_cpu) = {
            let v = self.vm(vm)?;
            (v.host, v.is_migrating, v.task_count(), v.cpu)
        };
        let machine = host.ok_or_else(|| {
            SchedulerError::invariant(format!("task {} assigned to detached vm {vm}", task.id))
        })?;
        if migrating {
            return Err(SchedulerError::VmMigrating(vm));
        }
        if task_count >= max_tasks {
            return Err(SchedulerError::capacity(machine, "task count at limit"));
        }
        if vm_cpu != task.required_cpu {
            return Err(SchedulerError::CpuMismatch {
                required: task.required_cpu,
                found: vm_cpu,
            });
        }
        {
            let m = self.machine(machine)?;
            if m.memory_committed + task.memory > m.memory_capacity {
                return Err(SchedulerError::capacity(machine, "insufficient memory"));
            }
        }

        let mem = task.memory;
        let id = task.id;
        self.machine_mut(machine)?.memory_committed += mem;
        let v = self.vm_mut(vm)?;
        v.tasks.insert(id);
        v.memory_committed += mem;
        self.tasks.insert(id, TaskStatus { vm, ..task });
        Ok(())
    }

    /// Remove a task from the model, releasing its memory on the VM and
    /// host machine. Returns the removed record.
    pub fn unassign_task(&mut self, task: TaskId) -> Result<TaskStatus> {
        let record = self
            .tasks
            .get(&task)
            .cloned()
            .ok_or(SchedulerError::TaskNotFound(task))?;
        let host = {
            let v = self.vm(record.vm)?;
            v.host
        };
        let v = self.vm_mut(record.vm)?;
        v.tasks.remove(&task);
        v.memory_committed = v.memory_committed.saturating_sub(record.memory);
        if let Some(machine) = host {
            let m = self.machine_mut(machine)?;
            m.memory_committed = m.memory_committed.saturating_sub(record.memory);
        }
        self.tasks.remove(&task);
        Ok(record)
    }

    // ---- transition tracker ----

    /// Record an issued `set_machine_state`; refused while another change
    /// is in flight.
    pub fn mark_state_changing(&mut self, machine: MachineId) -> Result<()> {
        let m = self.machine_mut(machine)?;
        if m.changing_state {
            return Err(SchedulerError::MachineChangingState(machine));
        }
        m.changing_state = true;
        Ok(())
    }

    /// Clear the state-change flag on `StateChangeComplete`.
    pub fn mark_state_change_done(&mut self, machine: MachineId) -> Result<()> {
        self.machine_mut(machine)?.changing_state = false;
        Ok(())
    }

    /// Record an issued migration of `vm` from its current host to `sink`:
    /// sets `is_migrating`, remembers the route, and counts the sink as a
    /// migration target. Refused while the VM is already moving. The
    /// caller still detaches/attaches the VM and invokes the actuator.
    pub fn begin_migration(&mut self, vm: VmId, sink: MachineId) -> Result<MigrationRoute> {
        let (migrating, host) = {
            let v = self.vm(vm)?;
            (v.is_migrating, v.host)
        };
        if migrating {
            return Err(SchedulerError::VmMigrating(vm));
        }
        let source = host.ok_or_else(|| {
            SchedulerError::invariant(format!("vm {vm} migrated while detached"))
        })?;
        if source == sink {
            return Err(SchedulerError::invariant(format!(
                "vm {vm} migrated onto its own host {sink}"
            )));
        }
        self.machine(sink)?;
        let route = MigrationRoute { source, sink };
        self.vm_mut(vm)?.is_migrating = true;
        self.machine_mut(sink)?.inbound_migrations += 1;
        self.migrations.insert(vm, route);
        Ok(route)
    }

    /// Close out a migration on `MigrationDone`: clears the VM flag,
    /// releases the sink's inbound count, and returns the route.
    pub fn finish_migration(&mut self, vm: VmId) -> Result<MigrationRoute> {
        let route = self
            .migrations
            .remove(&vm)
            .ok_or(SchedulerError::VmNotFound(vm))?;
        self.vm_mut(vm)?.is_migrating = false;
        let sink = self.machine_mut(route.sink)?;
        sink.inbound_migrations = sink.inbound_migrations.saturating_sub(1);
        Ok(route)
    }

    /// Roll back `begin_migration` when the actuator refuses the move.
    pub fn abort_migration(&mut self, vm: VmId) -> Result<MigrationRoute> {
        self.finish_migration(vm)
    }

    /// True while any in-flight migration is leaving this machine.
    pub fn has_outbound_migrations(&self, machine: MachineId) -> bool {
        self.migrations.values().any(|r| r.source == machine)
    }

    /// Route of an in-flight migration, if any.
    pub fn migration_route(&self, vm: VmId) -> Option<MigrationRoute> {
        self.migrations.get(&vm).copied()
    }

    pub fn set_tier(&mut self, machine: MachineId, tier: Tier) -> Result<()> {
        self.machine_mut(machine)?.tier = tier;
        Ok(())
    }

    /// Record the priority last written through the actuator.
    pub fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()> {
        let t = self
            .tasks
            .get_mut(&task)
            .ok_or(SchedulerError::TaskNotFound(task))?;
        t.priority = priority;
        Ok(())
    }

    // ---- consistency ----

    /// Verify every relationship invariant; returns the first violation.
    /// Cheap enough for tests after every event, not run in release.
    pub fn check_invariants(&self) -> Result<()> {
        for m in &self.machines {
            if m.vm_count() > self.cfg.max_vm_per_machine {
                return Err(SchedulerError::invariant(format!(
                    "{} holds {} vms, limit {}",
                    m.id,
                    m.vm_count(),
                    self.cfg.max_vm_per_machine
                )));
            }
            let mut committed = 0u64;
            for vm in m.vms() {
                let v = self.vm(vm)?;
                if v.host != Some(m.id) {
                    return Err(SchedulerError::invariant(format!(
                        "{vm} listed on {} but hosted on {:?}",
                        m.id, v.host
                    )));
                }
                if v.cpu != m.cpu {
                    return Err(SchedulerError::invariant(format!(
                        "{vm} family {} on {} family {}",
                        v.cpu, m.id, m.cpu
                    )));
                }
                committed += self.cfg.vm_memory_overhead + v.memory_committed;
            }
            if committed != m.memory_committed {
                return Err(SchedulerError::invariant(format!(
                    "{} memory ledger {} != recomputed {committed}",
                    m.id, m.memory_committed
                )));
            }
            if m.memory_committed > m.memory_capacity {
                return Err(SchedulerError::invariant(format!(
                    "{} committed {} over capacity {}",
                    m.id, m.memory_committed, m.memory_capacity
                )));
            }
        }
        for v in self.vms.values() {
            if v.task_count() > self.cfg.max_tasks_per_vm {
                return Err(SchedulerError::invariant(format!(
                    "{} holds {} tasks, limit {}",
                    v.id,
                    v.task_count(),
                    self.cfg.max_tasks_per_vm
                )));
            }
            let mut committed = 0u64;
            for t in v.tasks() {
                let task = self.task(t)?;
                if task.vm != v.id {
                    return Err(SchedulerError::invariant(format!(
                        "{t} listed on {} but bound to {}",
                        v.id, task.vm
                    )));
                }
                if task.required_cpu != v.cpu {
                    return Err(SchedulerError::invariant(format!(
                        "{t} family {} on {} family {}",
                        task.required_cpu, v.id, v.cpu
                    )));
                }
                committed += task.memory;
            }
            if committed != v.memory_committed {
                return Err(SchedulerError::invariant(format!(
                    "{} memory ledger {} != recomputed {committed}",
                    v.id, v.memory_committed
                )));
            }
        }
        for t in self.tasks.values() {
            let v = self.vm(t.vm)?;
            if !v.tasks.contains(&t.id) {
                return Err(SchedulerError::invariant(format!(
                    "{} bound to {} but missing from its task set",
                    t.id, t.vm
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::SlaClass;

    fn test_fleet(machines: usize) -> FleetModel {
        let cfg = SchedulerConfig::default();
        let machines = (0..machines)
            .map(|i| MachineStatus {
                id: MachineId(i),
                cpu: CpuFamily::X86,
                num_cpus: 8,
                memory_capacity: 1024,
                base_mips: 1000,
                base_power: 100,
                gpus: false,
                tier: Tier::Active,
                changing_state: false,
                inbound_migrations: 0,
                vms: BTreeSet::new(),
                memory_committed: 0,
            })
            .collect();
        FleetModel {
            machines,
            vms: HashMap::new(),
            tasks: HashMap::new(),
            migrations: HashMap::new(),
            cfg,
        }
    }

    fn task(id: usize, vm: VmId, memory: u64) -> TaskStatus {
        TaskStatus {
            id: TaskId(id),
            vm,
            required_cpu: CpuFamily::X86,
            required_vm: VmType::Linux,
            memory,
            arrival: 0,
            target_completion: 1_000_000,
            total_instructions: 1_000,
            gpu_capable: false,
            priority: Priority::from_sla(SlaClass::Sla0),
        }
    }

    #[test]
    fn attach_reserves_overhead() {
        let mut fleet = test_fleet(1);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();

        let m = fleet.machine(MachineId(0)).unwrap();
        assert_eq!(m.memory_committed, 8);
        assert_eq!(m.vm_count(), 1);
        fleet.check_invariants().unwrap();
    }

    #[test]
    fn assign_and_unassign_are_inverse() {
        let mut fleet = test_fleet(1);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();
        let before = fleet.machine(MachineId(0)).unwrap().memory_committed;

        fleet.assign_task(task(1, VmId(0), 100), VmId(0)).unwrap();
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_committed, before + 100);
        fleet.check_invariants().unwrap();

        fleet.unassign_task(TaskId(1)).unwrap();
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_committed, before);
        assert!(!fleet.contains_task(TaskId(1)));
        fleet.check_invariants().unwrap();
    }

    #[test]
    fn assign_to_migrating_vm_is_refused() {
        let mut fleet = test_fleet(2);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();
        fleet.begin_migration(VmId(0), MachineId(1)).unwrap();

        let err = fleet.assign_task(task(1, VmId(0), 100), VmId(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::VmMigrating(_)));
        // Nothing changed.
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_committed, 8);
        assert!(!fleet.contains_task(TaskId(1)));
    }

    #[test]
    fn failed_assign_leaves_no_partial_state() {
        let mut fleet = test_fleet(1);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();

        // 1024 capacity, 8 overhead committed: 2000 cannot fit.
        let err = fleet.assign_task(task(1, VmId(0), 2000), VmId(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExceeded(..)));
        assert_eq!(fleet.vm(VmId(0)).unwrap().task_count(), 0);
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_committed, 8);
        fleet.check_invariants().unwrap();
    }

    #[test]
    fn detach_releases_task_memory_too() {
        let mut fleet = test_fleet(2);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();
        fleet.assign_task(task(1, VmId(0), 100), VmId(0)).unwrap();

        fleet.detach_vm(VmId(0), MachineId(0)).unwrap();
        assert_eq!(fleet.machine(MachineId(0)).unwrap().memory_committed, 0);

        fleet.attach_vm(VmId(0), MachineId(1)).unwrap();
        assert_eq!(fleet.machine(MachineId(1)).unwrap().memory_committed, 108);
        // Task followed its VM.
        assert_eq!(fleet.task(TaskId(1)).unwrap().vm, VmId(0));
        fleet.check_invariants().unwrap();
    }

    #[test]
    fn vm_count_limit_enforced() {
        let mut fleet = test_fleet(1);
        for i in 0..10 {
            fleet.register_vm(VmId(i), VmType::Linux, CpuFamily::X86).unwrap();
            fleet.attach_vm(VmId(i), MachineId(0)).unwrap();
        }
        fleet.register_vm(VmId(10), VmType::Linux, CpuFamily::X86).unwrap();
        let err = fleet.attach_vm(VmId(10), MachineId(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExceeded(..)));
    }

    #[test]
    fn inbound_migration_counter_nests() {
        let mut fleet = test_fleet(2);
        for i in 0..2 {
            fleet.register_vm(VmId(i), VmType::Linux, CpuFamily::X86).unwrap();
            fleet.attach_vm(VmId(i), MachineId(0)).unwrap();
        }
        // Two migrations into machine 1: the first completion must not
        // strip the second one's demotion protection.
        fleet.begin_migration(VmId(0), MachineId(1)).unwrap();
        fleet.begin_migration(VmId(1), MachineId(1)).unwrap();
        assert!(fleet.has_outbound_migrations(MachineId(0)));

        let route = fleet.finish_migration(VmId(0)).unwrap();
        assert_eq!(route.sink, MachineId(1));
        assert!(fleet.machine(MachineId(1)).unwrap().has_inbound_migrations());
        fleet.finish_migration(VmId(1)).unwrap();
        assert!(!fleet.machine(MachineId(1)).unwrap().has_inbound_migrations());
        assert!(!fleet.has_outbound_migrations(MachineId(0)));
    }

    #[test]
    fn double_migration_refused() {
        let mut fleet = test_fleet(2);
        fleet.register_vm(VmId(0), VmType::Linux, CpuFamily::X86).unwrap();
        fleet.attach_vm(VmId(0), MachineId(0)).unwrap();
        fleet.begin_migration(VmId(0), MachineId(1)).unwrap();
        let err = fleet.begin_migration(VmId(0), MachineId(1)).unwrap_err();
        assert!(matches!(err, SchedulerError::VmMigrating(_)));
    }

    #[test]
    fn double_state_change_refused() {
        let mut fleet = test_fleet(1);
        fleet.mark_state_changing(MachineId(0)).unwrap();
        let err = fleet.mark_state_changing(MachineId(0)).unwrap_err();
        assert!(matches!(err, SchedulerError::MachineChangingState(_)));
    }
}
