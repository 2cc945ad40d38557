//! Synthetic fleet and workload generation
//!
//! Seeded random machines and tasks for CLI runs and soak tests. Arrival
//! times spread over the first 80% of the run; instruction counts and
//! memory sizes span a wide enough range to exercise both consolidation
//! and the capacity wall.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use stratus_core::{CpuFamily, SimTime, SlaClass, TaskId, VmType, MICROS_PER_SEC};

use crate::cluster::{MachineSpec, SimCluster, TaskSpec};

/// Knobs for the synthetic workload.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub tasks: usize,
    pub duration: SimTime,
    /// Machines per family: (family, count).
    pub machines: Vec<(CpuFamily, usize)>,
}

/// Seeded generator: the same seed reproduces the same fleet and task mix.
pub struct WorkloadGenerator {
    rng: StdRng,
}

impl WorkloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Populate the cluster with machines and tasks; returns the task ids.
    pub fn populate(&mut self, cluster: &mut SimCluster, spec: &WorkloadSpec) -> Vec<TaskId> {
        for &(family, count) in &spec.machines {
            for _ in 0..count {
                cluster.add_machine(self.random_machine(family));
            }
        }
        (0..spec.tasks)
            .map(|_| {
                let task = self.random_task(spec);
                cluster.add_task(task)
            })
            .collect()
    }

    fn random_machine(&mut self, family: CpuFamily) -> MachineSpec {
        let mips = self.rng.gen_range(400..=2000);
        let power = self.rng.gen_range(80..=250);
        let memory = *[8_192u64, 16_384, 32_768]
            .get(self.rng.gen_range(0..3))
            .unwrap_or(&16_384);
        let num_cpus = *[4u32, 8, 16].get(self.rng.gen_range(0..3)).unwrap_or(&8);
        let spec = MachineSpec::new(family, num_cpus, memory, mips, power);
        if self.rng.gen_bool(0.2) {
            spec.with_gpus()
        } else {
            spec
        }
    }

    fn random_task(&mut self, spec: &WorkloadSpec) -> TaskSpec {
        let family = {
            let families: Vec<CpuFamily> = spec.machines.iter().map(|&(f, _)| f).collect();
            families[self.rng.gen_range(0..families.len())]
        };
        let arrival = self.rng.gen_range(0..spec.duration * 4 / 5);
        // 10 seconds to ~2 hours of work at 1000 MIPS.
        let instructions = self.rng.gen_range(10_000_000_000u64..=7_200_000_000_000);
        let sla = match self.rng.gen_range(0..10) {
            0..=1 => SlaClass::Sla0,
            2..=4 => SlaClass::Sla1,
            5..=7 => SlaClass::Sla2,
            _ => SlaClass::Sla3,
        };
        // Deadline slack by class: the strictest classes get the least.
        let nominal = instructions / 1000;
        let slack = match sla {
            SlaClass::Sla0 => nominal / 5,
            SlaClass::Sla1 => nominal / 2,
            SlaClass::Sla2 => nominal,
            SlaClass::Sla3 => nominal * 10,
        };
        TaskSpec {
            required_cpu: family,
            required_vm: match self.rng.gen_range(0..4) {
                0 => VmType::LinuxRt,
                1 => VmType::Win,
                2 => VmType::Aix,
                _ => VmType::Linux,
            },
            required_sla: sla,
            memory: self.rng.gen_range(256..=4096),
            instructions,
            arrival,
            target_completion: arrival + nominal + slack + 30 * MICROS_PER_SEC,
            gpu_capable: self.rng.gen_bool(0.3),
        }
    }
}
