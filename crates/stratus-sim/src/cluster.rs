//! In-memory cluster behind the `Cluster` trait
//!
//! Stands in for the real simulator: machine/VM/task tables, deferred
//! completions for the asynchronous actuators, per-machine energy
//! integration, and per-class SLA accounting. Tasks run at the MIPS of
//! their host's performance state at start time; migrations do not pause
//! them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stratus_core::{
    Cluster, CpuFamily, MachineId, MachineInfo, PerfState, Priority, Result, SchedulerError,
    SimTime, SlaClass, SleepState, TaskId, TaskInfo, VmId, VmInfo, VmType, MICROS_PER_SEC,
};

/// Default time a VM migration takes to complete.
pub const DEFAULT_MIGRATION_LATENCY: SimTime = 2 * MICROS_PER_SEC;

/// Default time a machine sleep-state transition takes.
pub const DEFAULT_STATE_CHANGE_LATENCY: SimTime = MICROS_PER_SEC / 2;

/// Memory the simulator charges a machine per attached VM.
const VM_OVERHEAD: u64 = 8;

/// Hardware description of one simulated machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub cpu: CpuFamily,
    pub num_cpus: u32,
    pub memory: u64,
    /// MIPS per core, P0 first.
    pub performance: Vec<u64>,
    /// Watts per sleep state, S0 first.
    pub sleep_power: Vec<u64>,
    pub gpus: bool,
}

impl MachineSpec {
    /// Spec with the standard derated performance/power curves.
    pub fn new(cpu: CpuFamily, num_cpus: u32, memory: u64, mips: u64, power: u64) -> Self {
        Self {
            cpu,
            num_cpus,
            memory,
            performance: vec![mips, mips * 3 / 4, mips / 2, mips / 4],
            sleep_power: vec![power, power * 3 / 4, power / 2, power / 4, power / 10, 0],
            gpus: false,
        }
    }

    pub fn with_gpus(mut self) -> Self {
        self.gpus = true;
        self
    }
}

/// Workload description of one simulated task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub required_cpu: CpuFamily,
    pub required_vm: VmType,
    pub required_sla: SlaClass,
    pub memory: u64,
    pub instructions: u64,
    pub arrival: SimTime,
    pub target_completion: SimTime,
    pub gpu_capable: bool,
}

/// Event the cluster asks the engine to deliver later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    TaskArrival(TaskId),
    TaskCompletion(TaskId),
    MigrationDone(VmId),
    StateChangeComplete(MachineId),
    MemoryWarning(MachineId),
    SlaWarning(TaskId),
    PeriodicCheck,
}

#[derive(Debug)]
struct SimMachine {
    spec: MachineSpec,
    s_state: SleepState,
    /// Target of an in-flight state change, applied at completion.
    pending_state: Option<SleepState>,
    p_state: PerfState,
    memory_used: u64,
    active_tasks: u32,
    vms: Vec<VmId>,
    energy_watt_us: f64,
}

impl SimMachine {
    fn power_now(&self) -> u64 {
        self.spec
            .sleep_power
            .get(self.s_state.index())
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct SimVm {
    vm_type: VmType,
    cpu: CpuFamily,
    machine: Option<MachineId>,
    tasks: Vec<TaskId>,
}

#[derive(Debug)]
struct SimTask {
    spec: TaskSpec,
    vm: Option<VmId>,
    /// Instructions per microsecond once started.
    rate: u64,
    priority: Priority,
    started_at: Option<SimTime>,
    completed_at: Option<SimTime>,
    sla_warned: bool,
}

impl SimTask {
    fn remaining_at(&self, now: SimTime) -> u64 {
        match self.started_at {
            None => self.spec.instructions,
            Some(start) => {
                if self.completed_at.is_some() {
                    return 0;
                }
                let done = now.saturating_sub(start).saturating_mul(self.rate);
                self.spec.instructions.saturating_sub(done)
            }
        }
    }
}

/// The simulated cluster: info oracle, actuators, energy meter, and SLA
/// ledger in one place.
#[derive(Debug, Default)]
pub struct SimCluster {
    now: SimTime,
    machines: Vec<SimMachine>,
    vms: HashMap<VmId, SimVm>,
    tasks: HashMap<TaskId, SimTask>,
    next_vm: usize,
    next_task: usize,
    pending: Vec<(SimTime, SimEvent)>,
    migration_latency: SimTime,
    state_change_latency: SimTime,
    /// Per class: (completed, completed late).
    sla_counts: HashMap<SlaClass, (u64, u64)>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self {
            migration_latency: DEFAULT_MIGRATION_LATENCY,
            state_change_latency: DEFAULT_STATE_CHANGE_LATENCY,
            ..Self::default()
        }
    }

    pub fn add_machine(&mut self, spec: MachineSpec) -> MachineId {
        let id = MachineId(self.machines.len());
        self.machines.push(SimMachine {
            spec,
            s_state: SleepState::S0,
            pending_state: None,
            p_state: PerfState::P0,
            memory_used: 0,
            active_tasks: 0,
            vms: Vec::new(),
            energy_watt_us: 0.0,
        });
        id
    }

    /// Register a task; the engine schedules its arrival.
    pub fn add_task(&mut self, spec: TaskSpec) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(
            id,
            SimTask {
                spec,
                vm: None,
                rate: 0,
                priority: Priority::Low,
                started_at: None,
                completed_at: None,
                sla_warned: false,
            },
        );
        id
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.values().filter(|t| t.completed_at.is_some()).count()
    }

    /// Arrival times for the engine's initial event queue.
    pub fn arrivals(&self) -> Vec<(SimTime, TaskId)> {
        self.tasks
            .iter()
            .map(|(&id, t)| (t.spec.arrival, id))
            .collect()
    }

    /// Advance the clock, integrating energy at each machine's current
    /// draw.
    pub fn advance_to(&mut self, time: SimTime) {
        if time <= self.now {
            return;
        }
        let dt = (time - self.now) as f64;
        for m in &mut self.machines {
            m.energy_watt_us += m.power_now() as f64 * dt;
        }
        self.now = time;
    }

    /// Deferred events generated by actuator calls since the last drain.
    pub fn drain_pending(&mut self) -> Vec<(SimTime, SimEvent)> {
        std::mem::take(&mut self.pending)
    }

    /// Close the books on a completion event: mark the task done, free its
    /// resources, and count the SLA outcome. Returns false for a stale
    /// event (the task already finished).
    pub fn complete_task(&mut self, task: TaskId) -> bool {
        let Some(t) = self.tasks.get_mut(&task) else {
            return false;
        };
        if t.completed_at.is_some() || t.started_at.is_none() {
            return false;
        }
        t.completed_at = Some(self.now);
        let late = self.now > t.spec.target_completion;
        let class = t.spec.required_sla;
        let memory = t.spec.memory;
        let vm = t.vm.take();
        let entry = self.sla_counts.entry(class).or_insert((0, 0));
        entry.0 += 1;
        if late {
            entry.1 += 1;
        }
        if let Some(vm) = vm {
            if let Some(v) = self.vms.get_mut(&vm) {
                v.tasks.retain(|&x| x != task);
                if let Some(machine) = v.machine {
                    let m = &mut self.machines[machine.0];
                    m.memory_used = m.memory_used.saturating_sub(memory);
                    m.active_tasks = m.active_tasks.saturating_sub(1);
                }
            }
        }
        true
    }

    /// Apply an in-flight sleep-state transition.
    pub fn complete_state_change(&mut self, machine: MachineId) -> bool {
        let Some(m) = self.machines.get_mut(machine.0) else {
            return false;
        };
        match m.pending_state.take() {
            Some(state) => {
                m.s_state = state;
                true
            }
            None => false,
        }
    }

    /// Tasks that will miss their target and have not been warned yet.
    pub fn collect_sla_warnings(&mut self) -> Vec<TaskId> {
        let now = self.now;
        let mut out = Vec::new();
        for (&id, t) in &mut self.tasks {
            if t.completed_at.is_some() || t.sla_warned {
                continue;
            }
            let Some(start) = t.started_at else { continue };
            if t.rate == 0 {
                continue;
            }
            let finish = start + t.spec.instructions / t.rate;
            if finish > t.spec.target_completion && now >= t.spec.arrival {
                t.sla_warned = true;
                out.push(id);
            }
        }
        out
    }

    fn machine_ref(&self, id: MachineId) -> Result<&SimMachine> {
        self.machines
            .get(id.0)
            .ok_or(SchedulerError::MachineNotFound(id))
    }

    fn machine_mut(&mut self, id: MachineId) -> Result<&mut SimMachine> {
        self.machines
            .get_mut(id.0)
            .ok_or(SchedulerError::MachineNotFound(id))
    }

    fn vm_ref(&self, id: VmId) -> Result<&SimVm> {
        self.vms.get(&id).ok_or(SchedulerError::VmNotFound(id))
    }

    fn task_ref(&self, id: TaskId) -> Result<&SimTask> {
        self.tasks.get(&id).ok_or(SchedulerError::TaskNotFound(id))
    }
}

impl Cluster for SimCluster {
    fn machine_count(&self) -> usize {
        self.machines.len()
    }

    fn machine_info(&self, id: MachineId) -> Result<MachineInfo> {
        let m = self.machine_ref(id)?;
        Ok(MachineInfo {
            id,
            cpu: m.spec.cpu,
            num_cpus: m.spec.num_cpus,
            memory_size: m.spec.memory,
            memory_used: m.memory_used,
            active_tasks: m.active_tasks,
            active_vms: m.vms.len() as u32,
            gpus: m.spec.gpus,
            s_state: m.s_state,
            p_state: m.p_state,
            performance: m.spec.performance.clone(),
            sleep_power: m.spec.sleep_power.clone(),
        })
    }

    fn vm_info(&self, id: VmId) -> Result<VmInfo> {
        let v = self.vm_ref(id)?;
        Ok(VmInfo {
            id,
            vm_type: v.vm_type,
            cpu: v.cpu,
            machine_id: v.machine.unwrap_or(MachineId(usize::MAX)),
            active_tasks: v.tasks.clone(),
        })
    }

    fn task_info(&self, id: TaskId) -> Result<TaskInfo> {
        let t = self.task_ref(id)?;
        Ok(TaskInfo {
            id,
            required_cpu: t.spec.required_cpu,
            required_vm: t.spec.required_vm,
            required_sla: t.spec.required_sla,
            required_memory: t.spec.memory,
            total_instructions: t.spec.instructions,
            remaining_instructions: t.remaining_at(self.now),
            arrival: t.spec.arrival,
            target_completion: t.spec.target_completion,
            gpu_capable: t.spec.gpu_capable,
            priority: t.priority,
        })
    }

    fn is_sla_violation(&self, id: TaskId) -> Result<bool> {
        let t = self.task_ref(id)?;
        Ok(match t.completed_at {
            Some(done) => done > t.spec.target_completion,
            None => self.now > t.spec.target_completion,
        })
    }

    fn sla_report(&self, class: SlaClass) -> f64 {
        match self.sla_counts.get(&class) {
            Some(&(completed, late)) if completed > 0 => late as f64 / completed as f64 * 100.0,
            _ => 0.0,
        }
    }

    fn cluster_energy_kwh(&self) -> f64 {
        // watt-microseconds -> kilowatt-hours
        let watt_us: f64 = self.machines.iter().map(|m| m.energy_watt_us).sum();
        watt_us / (1000.0 * 3600.0 * MICROS_PER_SEC as f64)
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuFamily) -> Result<VmId> {
        let id = VmId(self.next_vm);
        self.next_vm += 1;
        self.vms.insert(
            id,
            SimVm {
                vm_type,
                cpu,
                machine: None,
                tasks: Vec::new(),
            },
        );
        Ok(id)
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        let cpu = self.vm_ref(vm)?.cpu;
        let (capacity, used) = {
            let m = self.machine_ref(machine)?;
            if m.spec.cpu != cpu {
                return Err(SchedulerError::CpuMismatch {
                    required: cpu,
                    found: m.spec.cpu,
                });
            }
            (m.spec.memory, m.memory_used)
        };
        let m = self.machine_mut(machine)?;
        m.vms.push(vm);
        m.memory_used += VM_OVERHEAD;
        if used + VM_OVERHEAD > capacity {
            self.pending
                .push((self.now, SimEvent::MemoryWarning(machine)));
        }
        if let Some(v) = self.vms.get_mut(&vm) {
            v.machine = Some(machine);
        }
        Ok(())
    }

    fn add_task_to_vm(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<()> {
        let machine = self
            .vm_ref(vm)?
            .machine
            .ok_or_else(|| SchedulerError::rejected("add_task_to_vm", "vm not attached"))?;
        let rate = {
            let m = self.machine_ref(machine)?;
            m.spec
                .performance
                .get(m.p_state.index())
                .copied()
                .unwrap_or(0)
                .max(1)
        };
        let memory = self.task_ref(task)?.spec.memory;
        {
            let t = self
                .tasks
                .get_mut(&task)
                .ok_or(SchedulerError::TaskNotFound(task))?;
            if t.started_at.is_some() {
                return Err(SchedulerError::rejected("add_task_to_vm", "task already started"));
            }
            t.vm = Some(vm);
            t.rate = rate;
            t.priority = priority;
            t.started_at = Some(self.now);
        }
        if let Some(v) = self.vms.get_mut(&vm) {
            v.tasks.push(task);
        }
        let m = self.machine_mut(machine)?;
        m.memory_used += memory;
        m.active_tasks += 1;
        let overcommitted = m.memory_used > m.spec.memory;
        let finish = self.now + self.task_ref(task)?.spec.instructions / rate;
        self.pending.push((finish, SimEvent::TaskCompletion(task)));
        if overcommitted {
            self.pending
                .push((self.now, SimEvent::MemoryWarning(machine)));
        }
        debug!(%task, %vm, %machine, finish, "task started");
        Ok(())
    }

    fn remove_task_from_vm(&mut self, vm: VmId, task: TaskId) -> Result<()> {
        let memory = self.task_ref(task)?.spec.memory;
        let machine = {
            let v = self.vms.get_mut(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
            v.tasks.retain(|&t| t != task);
            v.machine
        };
        if let Some(t) = self.tasks.get_mut(&task) {
            t.vm = None;
        }
        if let Some(machine) = machine {
            let m = self.machine_mut(machine)?;
            m.memory_used = m.memory_used.saturating_sub(memory);
            m.active_tasks = m.active_tasks.saturating_sub(1);
        }
        Ok(())
    }

    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> Result<()> {
        let (source, task_memory, task_count) = {
            let v = self.vm_ref(vm)?;
            let source = v
                .machine
                .ok_or_else(|| SchedulerError::rejected("migrate_vm", "vm not attached"))?;
            let mem: u64 = v
                .tasks
                .iter()
                .filter_map(|t| self.tasks.get(t))
                .map(|t| t.spec.memory)
                .sum();
            (source, mem, v.tasks.len() as u32)
        };
        self.machine_ref(target)?;
        {
            let m = self.machine_mut(source)?;
            m.vms.retain(|&v| v != vm);
            m.memory_used = m.memory_used.saturating_sub(VM_OVERHEAD + task_memory);
            m.active_tasks = m.active_tasks.saturating_sub(task_count);
        }
        {
            let m = self.machine_mut(target)?;
            m.vms.push(vm);
            m.memory_used += VM_OVERHEAD + task_memory;
            m.active_tasks += task_count;
        }
        if let Some(v) = self.vms.get_mut(&vm) {
            v.machine = Some(target);
        }
        self.pending
            .push((self.now + self.migration_latency, SimEvent::MigrationDone(vm)));
        Ok(())
    }

    fn shutdown_vm(&mut self, vm: VmId) -> Result<()> {
        let v = self.vms.remove(&vm).ok_or(SchedulerError::VmNotFound(vm))?;
        if let Some(machine) = v.machine {
            let m = self.machine_mut(machine)?;
            m.vms.retain(|&x| x != vm);
            m.memory_used = m.memory_used.saturating_sub(VM_OVERHEAD);
        }
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: SleepState) -> Result<()> {
        let latency = self.state_change_latency;
        let now = self.now;
        let m = self.machine_mut(machine)?;
        m.pending_state = Some(state);
        self.pending
            .push((now + latency, SimEvent::StateChangeComplete(machine)));
        Ok(())
    }

    fn set_core_performance(&mut self, machine: MachineId, _core: u32, p: PerfState) -> Result<()> {
        self.machine_mut(machine)?.p_state = p;
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()> {
        // Priorities shape the real simulator's time-slicing; this model
        // runs each task at a fixed rate, so the write is observable but
        // does not change completion times.
        let t = self
            .tasks
            .get_mut(&task)
            .ok_or(SchedulerError::TaskNotFound(task))?;
        t.priority = priority;
        Ok(())
    }
}
