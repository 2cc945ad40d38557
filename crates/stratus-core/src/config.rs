//! Scheduler configuration
//!
//! All tunables the placement, power, and consolidation policies depend on.
//! Defaults follow the conservative variant: 10 VMs per machine, 10 tasks
//! per VM, 8-unit VM overhead, 15-minute migration floor.

use serde::{Deserialize, Serialize};

use crate::types::SimTime;

/// Default cap on tasks per VM.
pub const DEFAULT_MAX_TASKS_PER_VM: usize = 10;

/// Default cap on VMs per machine.
pub const DEFAULT_MAX_VM_PER_MACHINE: usize = 10;

/// Default per-VM memory overhead, in memory units.
pub const DEFAULT_VM_MEMORY_OVERHEAD: u64 = 8;

/// Default minimum projected remaining run-time for a VM to be worth
/// migrating: 15 minutes, in microseconds.
pub const DEFAULT_MIGRATION_MIN_REMAINING: SimTime = 15 * 60 * 1_000_000;

/// Scheduler tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum active tasks per VM
    pub max_tasks_per_vm: usize,

    /// Maximum VMs attached to one machine
    pub max_vm_per_machine: usize,

    /// Fraction of each family initially placed in the Standby tier
    pub initial_standby_fraction: f64,

    /// Fraction of each family initially placed in the Off tier
    pub initial_off_fraction: f64,

    /// Minimum projected remaining run-time for a VM to be migratable (µs)
    pub migration_min_remaining: SimTime,

    /// Remaining-budget fraction below which a task is raised to HIGH
    pub high_prio_threshold: f64,

    /// Remaining-budget fraction below which a task is raised to MID
    pub mid_prio_threshold: f64,

    /// Run consolidation on every N-th task completion
    pub consolidation_every_n_completions: u64,

    /// Memory reserved per VM on its host, in memory units
    pub vm_memory_overhead: u64,

    /// Minimum Standby machines to keep available per CPU family
    pub standby_reserve: usize,

    /// Utilization below which an Active machine is a drain candidate
    pub low_utilization_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_vm: DEFAULT_MAX_TASKS_PER_VM,
            max_vm_per_machine: DEFAULT_MAX_VM_PER_MACHINE,
            initial_standby_fraction: 0.4,
            initial_off_fraction: 0.4,
            migration_min_remaining: DEFAULT_MIGRATION_MIN_REMAINING,
            high_prio_threshold: 0.2,
            mid_prio_threshold: 0.5,
            consolidation_every_n_completions: 100,
            vm_memory_overhead: DEFAULT_VM_MEMORY_OVERHEAD,
            standby_reserve: 1,
            low_utilization_threshold: 0.25,
        }
    }
}

impl SchedulerConfig {
    /// Fraction of each family initially placed in the Active tier.
    pub fn initial_active_fraction(&self) -> f64 {
        (1.0 - self.initial_standby_fraction - self.initial_off_fraction).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_tasks_per_vm, 10);
        assert_eq!(cfg.max_vm_per_machine, 10);
        assert_eq!(cfg.vm_memory_overhead, 8);
        assert_eq!(cfg.migration_min_remaining, 900_000_000);
        assert_eq!(cfg.consolidation_every_n_completions, 100);
        assert!((cfg.initial_active_fraction() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = SchedulerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_tasks_per_vm, cfg.max_tasks_per_vm);
        assert_eq!(parsed.migration_min_remaining, cfg.migration_min_remaining);
    }
}
