//! Core types shared across Stratus components

use serde::{Deserialize, Serialize};

/// Simulation timestamp in microseconds.
pub type SimTime = u64;

/// Microseconds per second, for report formatting.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Unique identifier for a machine (dense, assigned at init)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineId(pub usize);

/// Unique identifier for a VM (allocated monotonically by the cluster)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmId(pub usize);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub usize);

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vm{}", self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// CPU family of a machine, VM, or task requirement.
///
/// A VM and its host machine must agree; a task and its VM must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuFamily {
    X86,
    Arm,
    Power,
    Riscv,
}

impl CpuFamily {
    /// All families, in reporting order.
    pub const ALL: [CpuFamily; 4] = [
        CpuFamily::X86,
        CpuFamily::Arm,
        CpuFamily::Power,
        CpuFamily::Riscv,
    ];
}

impl std::fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuFamily::X86 => write!(f, "x86"),
            CpuFamily::Arm => write!(f, "arm"),
            CpuFamily::Power => write!(f, "power"),
            CpuFamily::Riscv => write!(f, "riscv"),
        }
    }
}

/// VM image type requested by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmType {
    Linux,
    LinuxRt,
    Win,
    Aix,
}

/// SLA class of a task. Sla0 is the strictest; Sla3 carries no deadline
/// obligation and is excluded from violation reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl std::fmt::Display for SlaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlaClass::Sla0 => write!(f, "SLA0"),
            SlaClass::Sla1 => write!(f, "SLA1"),
            SlaClass::Sla2 => write!(f, "SLA2"),
            SlaClass::Sla3 => write!(f, "SLA3"),
        }
    }
}

/// Task scheduling priority, written through the cluster actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Mid,
    Low,
}

impl Priority {
    /// Admission-time priority for a task of the given SLA class.
    pub fn from_sla(sla: SlaClass) -> Self {
        match sla {
            SlaClass::Sla0 => Priority::High,
            SlaClass::Sla1 => Priority::Mid,
            _ => Priority::Low,
        }
    }
}

/// Machine sleep state. S0 is fully on; deeper states draw less power and
/// take longer to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SleepState {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SleepState {
    /// Index into a machine's per-sleep-state power vector.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-core performance state. P0 is fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PerfState {
    P0,
    P1,
    P2,
    P3,
}

impl PerfState {
    /// Index into a machine's per-performance-state MIPS vector.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Power tier a machine is assigned to by the scheduler.
///
/// The derived ordering (Active < Standby < Off) is part of the machine
/// ranking contract: with equal efficiency, active machines rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Active,
    Standby,
    Off,
}

impl Tier {
    /// Sleep state a machine in this tier is driven to.
    pub fn target_state(self) -> SleepState {
        match self {
            Tier::Active => SleepState::S0,
            Tier::Standby => SleepState::S2,
            Tier::Off => SleepState::S5,
        }
    }
}

/// Machine snapshot returned by the cluster info oracle.
///
/// Immutable attributes (cpu, num_cpus, memory_size, performance,
/// sleep_power, gpus) never change after init; the rest reflect the
/// simulator's current view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub cpu: CpuFamily,
    pub num_cpus: u32,
    /// Total memory capacity, in memory units.
    pub memory_size: u64,
    /// Memory currently in use, in memory units.
    pub memory_used: u64,
    /// Tasks currently running on the machine.
    pub active_tasks: u32,
    /// VMs currently attached to the machine.
    pub active_vms: u32,
    pub gpus: bool,
    pub s_state: SleepState,
    pub p_state: PerfState,
    /// MIPS delivered per core at each performance state, P0 first.
    pub performance: Vec<u64>,
    /// Power draw in watts at each sleep state, S0 first.
    pub sleep_power: Vec<u64>,
}

impl MachineInfo {
    /// MIPS per core at the given performance state.
    pub fn mips_at(&self, p: PerfState) -> u64 {
        self.performance.get(p.index()).copied().unwrap_or(0)
    }

    /// Power draw in watts at the given sleep state.
    pub fn power_at(&self, s: SleepState) -> u64 {
        self.sleep_power.get(s.index()).copied().unwrap_or(0)
    }
}

/// VM snapshot returned by the cluster info oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: VmType,
    pub cpu: CpuFamily,
    pub machine_id: MachineId,
    pub active_tasks: Vec<TaskId>,
}

/// Task snapshot returned by the cluster info oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub required_cpu: CpuFamily,
    pub required_vm: VmType,
    pub required_sla: SlaClass,
    /// Memory footprint, in memory units.
    pub required_memory: u64,
    pub total_instructions: u64,
    pub remaining_instructions: u64,
    pub arrival: SimTime,
    pub target_completion: SimTime,
    pub gpu_capable: bool,
    pub priority: Priority,
}

impl TaskInfo {
    /// Wall-clock budget between arrival and target completion.
    pub fn budget(&self) -> SimTime {
        self.target_completion.saturating_sub(self.arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_follows_sla_class() {
        assert_eq!(Priority::from_sla(SlaClass::Sla0), Priority::High);
        assert_eq!(Priority::from_sla(SlaClass::Sla1), Priority::Mid);
        assert_eq!(Priority::from_sla(SlaClass::Sla2), Priority::Low);
        assert_eq!(Priority::from_sla(SlaClass::Sla3), Priority::Low);
    }

    #[test]
    fn tier_target_states() {
        assert_eq!(Tier::Active.target_state(), SleepState::S0);
        assert_eq!(Tier::Standby.target_state(), SleepState::S2);
        assert_eq!(Tier::Off.target_state(), SleepState::S5);
    }

    #[test]
    fn tier_ordering_prefers_active() {
        assert!(Tier::Active < Tier::Standby);
        assert!(Tier::Standby < Tier::Off);
    }

    #[test]
    fn machine_info_state_vectors() {
        let info = MachineInfo {
            id: MachineId(0),
            cpu: CpuFamily::X86,
            num_cpus: 8,
            memory_size: 16384,
            memory_used: 0,
            active_tasks: 0,
            active_vms: 0,
            gpus: false,
            s_state: SleepState::S0,
            p_state: PerfState::P0,
            performance: vec![1000, 800, 600, 400],
            sleep_power: vec![200, 150, 100, 50, 20, 0],
        };
        assert_eq!(info.mips_at(PerfState::P0), 1000);
        assert_eq!(info.mips_at(PerfState::P3), 400);
        assert_eq!(info.power_at(SleepState::S0), 200);
        assert_eq!(info.power_at(SleepState::S5), 0);
    }
}
