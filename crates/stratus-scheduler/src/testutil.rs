//! Scripted cluster double for scheduler tests.
//!
//! Implements the `Cluster` trait over plain tables and records every
//! actuator call so tests can assert on the exact sequence the scheduler
//! issued. Asynchronous actuators mutate the tables immediately; tests
//! deliver the matching completion callbacks themselves.

use std::collections::HashMap;

use stratus_core::{
    Cluster, CpuFamily, MachineId, MachineInfo, PerfState, Priority, Result, SchedulerError,
    SimTime, SlaClass, SleepState, TaskId, TaskInfo, VmId, VmInfo, VmType,
};

/// One recorded actuator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateVm(VmType, CpuFamily),
    AttachVm(VmId, MachineId),
    AddTask(VmId, TaskId, Priority),
    RemoveTask(VmId, TaskId),
    Migrate(VmId, MachineId),
    Shutdown(VmId),
    SetState(MachineId, SleepState),
    SetCorePerf(MachineId, u32, PerfState),
    SetPriority(TaskId, Priority),
}

/// In-memory cluster with recorded actuator calls.
#[derive(Debug, Default)]
pub struct StubCluster {
    pub machines: Vec<MachineInfo>,
    pub vms: HashMap<VmId, VmInfo>,
    pub tasks: HashMap<TaskId, TaskInfo>,
    pub calls: Vec<Call>,
    pub energy_kwh: f64,
    pub sla: HashMap<SlaClass, f64>,
    next_vm: usize,
    next_task: usize,
}

/// Placeholder host for a created-but-unattached VM.
const UNATTACHED: MachineId = MachineId(usize::MAX);

impl StubCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a machine with a flat performance curve derived from `mips`.
    pub fn add_machine(&mut self, cpu: CpuFamily, memory: u64, mips: u64, power: u64) -> MachineId {
        self.add_machine_full(cpu, 1, memory, mips, power, false)
    }

    pub fn add_machine_full(
        &mut self,
        cpu: CpuFamily,
        num_cpus: u32,
        memory: u64,
        mips: u64,
        power: u64,
        gpus: bool,
    ) -> MachineId {
        let id = MachineId(self.machines.len());
        self.machines.push(MachineInfo {
            id,
            cpu,
            num_cpus,
            memory_size: memory,
            memory_used: 0,
            active_tasks: 0,
            active_vms: 0,
            gpus,
            s_state: SleepState::S0,
            p_state: PerfState::P0,
            performance: vec![mips, mips * 3 / 4, mips / 2, mips / 4],
            sleep_power: vec![power, power * 3 / 4, power / 2, power / 4, power / 8, 0],
        });
        id
    }

    /// Register a task the oracle knows about; delivery to the scheduler
    /// is the test's job.
    #[allow(clippy::too_many_arguments)]
    pub fn add_task(
        &mut self,
        cpu: CpuFamily,
        vm_type: VmType,
        sla: SlaClass,
        memory: u64,
        instructions: u64,
        arrival: SimTime,
        target_completion: SimTime,
    ) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(
            id,
            TaskInfo {
                id,
                required_cpu: cpu,
                required_vm: vm_type,
                required_sla: sla,
                required_memory: memory,
                total_instructions: instructions,
                remaining_instructions: instructions,
                arrival,
                target_completion,
                gpu_capable: false,
                priority: Priority::Low,
            },
        );
        id
    }

    /// Calls of one shape, for focused assertions.
    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<&Call> {
        self.calls.iter().filter(|c| pred(c)).collect()
    }

    fn machine_entry(&mut self, id: MachineId) -> Result<&mut MachineInfo> {
        self.machines
            .get_mut(id.0)
            .ok_or(SchedulerError::MachineNotFound(id))
    }
}

impl Cluster for StubCluster {
    fn machine_count(&self) -> usize {
        self.machines.len()
    }

    fn machine_info(&self, id: MachineId) -> Result<MachineInfo> {
        self.machines
            .get(id.0)
            .cloned()
            .ok_or(SchedulerError::MachineNotFound(id))
    }

    fn vm_info(&self, id: VmId) -> Result<VmInfo> {
        self.vms.get(&id).cloned().ok_or(SchedulerError::VmNotFound(id))
    }

    fn task_info(&self, id: TaskId) -> Result<TaskInfo> {
        self.tasks
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::TaskNotFound(id))
    }

    fn is_sla_violation(&self, id: TaskId) -> Result<bool> {
        self.task_info(id).map(|_| false)
    }

    fn sla_report(&self, class: SlaClass) -> f64 {
        self.sla.get(&class).copied().unwrap_or(0.0)
    }

    fn cluster_energy_kwh(&self) -> f64 {
        self.energy_kwh
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuFamily) -> Result<VmId> {
        let id = VmId(self.next_vm);
        self.next_vm += 1;
        self.vms.insert(
            id,
            VmInfo {
                id,
                vm_type,
                cpu,
                machine_id: UNATTACHED,
                active_tasks: Vec::new(),
            },
        );
        self.calls.push(Call::CreateVm(vm_type, cpu));
        Ok(id)
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        self.machine_entry(machine)?.active_vms += 1;
        let entry = self.vms.get_mut(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
        entry.machine_id = machine;
        self.calls.push(Call::AttachVm(vm, machine));
        Ok(())
    }

    fn add_task_to_vm(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<()> {
        let memory = self.task_info(task)?.required_memory;
        let machine = {
            let entry = self.vms.get_mut(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
            entry.active_tasks.push(task);
            entry.machine_id
        };
        if machine != UNATTACHED {
            let m = self.machine_entry(machine)?;
            m.memory_used += memory;
            m.active_tasks += 1;
        }
        if let Some(t) = self.tasks.get_mut(&task) {
            t.priority = priority;
        }
        self.calls.push(Call::AddTask(vm, task, priority));
        Ok(())
    }

    fn remove_task_from_vm(&mut self, vm: VmId, task: TaskId) -> Result<()> {
        let memory = self.task_info(task)?.required_memory;
        let machine = {
            let entry = self.vms.get_mut(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
            entry.active_tasks.retain(|&t| t != task);
            entry.machine_id
        };
        if machine != UNATTACHED {
            let m = self.machine_entry(machine)?;
            m.memory_used = m.memory_used.saturating_sub(memory);
            m.active_tasks = m.active_tasks.saturating_sub(1);
        }
        self.calls.push(Call::RemoveTask(vm, task));
        Ok(())
    }

    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> Result<()> {
        let entry = self.vms.get_mut(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
        entry.machine_id = target;
        self.calls.push(Call::Migrate(vm, target));
        Ok(())
    }

    fn shutdown_vm(&mut self, vm: VmId) -> Result<()> {
        self.vms.remove(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
        self.calls.push(Call::Shutdown(vm));
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: SleepState) -> Result<()> {
        self.machine_entry(machine)?.s_state = state;
        self.calls.push(Call::SetState(machine, state));
        Ok(())
    }

    fn set_core_performance(&mut self, machine: MachineId, core: u32, p: PerfState) -> Result<()> {
        self.machine_entry(machine)?.p_state = p;
        self.calls.push(Call::SetCorePerf(machine, core, p));
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()> {
        let t = self
            .tasks
            .get_mut(&task)
            .ok_or(SchedulerError::TaskNotFound(task))?;
        t.priority = priority;
        self.calls.push(Call::SetPriority(task, priority));
        Ok(())
    }
}
