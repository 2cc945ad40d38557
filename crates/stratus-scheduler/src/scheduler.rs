//! Event dispatcher
//!
//! Thin routing from the simulator's callbacks into the placement, power,
//! consolidation, and priority components. Every handler runs to
//! completion and leaves the fleet model consistent; completion of
//! asynchronous actuator calls arrives as later callbacks, never by
//! waiting here.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stratus_core::{
    Cluster, MachineId, Priority, Result, SchedulerConfig, SimTime, SlaClass, SleepState, TaskId,
    Tier, VmId, MICROS_PER_SEC,
};

use crate::capacity::{can_machine_host_vm, utilization};
use crate::consolidate::{migrate_vm_to, ConsolidationEngine};
use crate::fleet::FleetModel;
use crate::placement::{PlacementEngine, PlacementOutcome};
use crate::power::PowerController;
use crate::priority::PriorityController;

/// Terminal report emitted on `SimulationComplete`. SLA3 is omitted by
/// contract: it carries no violation accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub sla0_violation_pct: f64,
    pub sla1_violation_pct: f64,
    pub sla2_violation_pct: f64,
    pub total_energy_kwh: f64,
    pub wall_time_secs: f64,
}

/// Decision counters, for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub tier_promotions: u64,
    pub tier_demotions: u64,
    pub migrations_started: u64,
    pub tasks_completed: u64,
}

/// The scheduler core: owns the fleet model and the decision components,
/// and implements every inbound simulator callback.
pub struct Scheduler {
    fleet: FleetModel,
    placement: PlacementEngine,
    power: PowerController,
    consolidation: ConsolidationEngine,
    priority: PriorityController,
    completions: u64,
}

impl Scheduler {
    /// Build the fleet model from the cluster and apply the initial tier
    /// split.
    pub fn init<C: Cluster + ?Sized>(cluster: &mut C, cfg: SchedulerConfig) -> Result<Self> {
        info!(
            machines = cluster.machine_count(),
            "initializing scheduler"
        );
        let mut fleet = FleetModel::from_cluster(cluster, &cfg)?;
        let mut power = PowerController::new();
        power.apply_initial_split(&mut fleet, cluster)?;
        Ok(Self {
            fleet,
            placement: PlacementEngine::new(),
            power,
            consolidation: ConsolidationEngine::new(),
            priority: PriorityController::new(),
            completions: 0,
        })
    }

    /// Read access to the model, for inspection and tests.
    pub fn fleet(&self) -> &FleetModel {
        &self.fleet
    }

    /// Tasks currently parked on the placement retry queue.
    pub fn queued_tasks(&self) -> usize {
        self.placement.queued()
    }

    /// Decision counters accumulated so far.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tier_promotions: self.power.promotions,
            tier_demotions: self.power.demotions,
            migrations_started: self.consolidation.migrations_started,
            tasks_completed: self.completions,
        }
    }

    /// `NewTask`: admit and place.
    pub fn on_new_task<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        task: TaskId,
    ) -> Result<()> {
        match self
            .placement
            .place(&mut self.fleet, &mut self.power, cluster, now, task)
        {
            Ok(PlacementOutcome::Placed { .. } | PlacementOutcome::AlreadyPlaced) => Ok(()),
            Ok(PlacementOutcome::Queued) => {
                debug!(%task, queued = self.placement.queued(), "task parked for retry");
                Ok(())
            }
            Err(err) if err.is_stale_id() => {
                warn!(%task, %err, "new-task callback for unknown id ignored");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// `TaskComplete`: unwind the placement, clean up an emptied VM, demote
    /// an emptied host, give queued tasks the freed slot, and periodically
    /// consolidate.
    pub fn on_task_complete<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        task: TaskId,
    ) -> Result<()> {
        if !self.fleet.contains_task(task) {
            warn!(%task, "completion for unknown task ignored");
            return Ok(());
        }
        let record = self.fleet.unassign_task(task)?;
        debug!(%task, vm = %record.vm, "task complete");

        self.reap_vm_if_empty(cluster, record.vm)?;

        self.placement
            .drain_retry_queue(&mut self.fleet, &mut self.power, cluster, now);

        self.completions += 1;
        if self.completions % self.fleet.config().consolidation_every_n_completions == 0 {
            self.consolidation.run(&mut self.fleet, cluster, now);
        }
        Ok(())
    }

    /// `MigrationDone`: clear the transit flags, shut down a VM that
    /// emptied mid-flight, and demote the source it left behind.
    pub fn on_migration_done<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        vm: VmId,
    ) -> Result<()> {
        let route = match self.fleet.finish_migration(vm) {
            Ok(route) => route,
            Err(err) => {
                warn!(%vm, %err, "migration-done for unknown migration ignored");
                return Ok(());
            }
        };
        debug!(%vm, from = %route.source, to = %route.sink, time = now, "migration complete");

        // A task may have completed while the VM was in flight.
        self.reap_vm_if_empty(cluster, vm)?;

        self.power
            .try_demote_idle(&mut self.fleet, cluster, route.source);
        Ok(())
    }

    /// `StateChangeComplete`: the machine reached its requested sleep
    /// state; queued work may now fit.
    pub fn on_state_change_complete<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        machine: MachineId,
    ) -> Result<()> {
        if let Err(err) = self.fleet.mark_state_change_done(machine) {
            warn!(%machine, %err, "state-change-complete for unknown machine ignored");
            return Ok(());
        }
        debug!(%machine, time = now, "state change complete");
        self.placement
            .drain_retry_queue(&mut self.fleet, &mut self.power, cluster, now);
        Ok(())
    }

    /// `MemoryWarning`: the machine is overcommitted; move its largest VM
    /// to the least-utilized compatible active host.
    pub fn on_memory_warning<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        machine: MachineId,
    ) -> Result<()> {
        warn!(%machine, time = now, "memory overcommit warning");
        let Some(vm) = self.largest_stationary_vm(machine) else {
            warn!(%machine, "no movable vm to relieve memory pressure");
            return Ok(());
        };
        match self.least_utilized_sink(cluster, machine, vm)? {
            Some(sink) => {
                migrate_vm_to(&mut self.fleet, cluster, vm, sink)?;
                info!(%vm, from = %machine, to = %sink, "migrating to relieve memory pressure");
            }
            None => {
                warn!(%machine, %vm, "memory pressure persists, no compatible sink");
            }
        }
        Ok(())
    }

    /// `SLAWarning`: move the task's VM somewhere quieter, or failing
    /// that, raise its priority and floor the host's cores at P0.
    pub fn on_sla_warning<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
        task: TaskId,
    ) -> Result<()> {
        let Ok(record) = self.fleet.task(task) else {
            warn!(%task, time = now, "sla warning for untracked task ignored");
            return Ok(());
        };
        let vm = record.vm;
        let Some(host) = self.fleet.vm(vm)?.host else {
            return Ok(());
        };
        let violating = cluster.is_sla_violation(task).unwrap_or(false);
        warn!(%task, %vm, %host, violating, "sla warning");

        // Once the deadline is already blown, migration overhead only
        // makes things worse; go straight to the priority boost.
        if !violating && !self.fleet.vm(vm)?.is_migrating {
            let host_util = utilization(&self.fleet, cluster, host)?;
            if let Some(sink) = self.quieter_sink(cluster, host, vm, host_util)? {
                migrate_vm_to(&mut self.fleet, cluster, vm, sink)?;
                info!(%vm, to = %sink, "migrating vm off busy host for sla recovery");
                return Ok(());
            }
        }

        cluster.set_task_priority(task, Priority::High)?;
        self.fleet.set_task_priority(task, Priority::High)?;
        let num_cpus = self.fleet.machine(host)?.num_cpus;
        for core in 0..num_cpus {
            cluster.set_core_performance(host, core, stratus_core::PerfState::P0)?;
        }
        info!(%task, %host, "priority raised and host cores floored at P0");
        Ok(())
    }

    /// `PeriodicCheck`: priority sweep, retry drain, consolidation, idle
    /// demotion.
    pub fn on_periodic_check<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
    ) -> Result<()> {
        self.priority.sweep(&mut self.fleet, cluster, now);
        self.placement
            .drain_retry_queue(&mut self.fleet, &mut self.power, cluster, now);
        self.consolidation.run(&mut self.fleet, cluster, now);
        self.consolidation
            .drain_low_utilization(&mut self.fleet, cluster);
        self.demote_idle_actives(cluster);
        Ok(())
    }

    /// `SimulationComplete`: tear everything down and produce the report.
    pub fn on_simulation_complete<C: Cluster + ?Sized>(
        &mut self,
        cluster: &mut C,
        now: SimTime,
    ) -> Result<FinalReport> {
        let vms: Vec<VmId> = self.fleet.vms().map(|v| v.id).collect();
        for vm in vms {
            if let Err(err) = cluster.shutdown_vm(vm) {
                warn!(%vm, %err, "shutdown at simulation end failed");
            }
            let host = self.fleet.vm(vm)?.host;
            let tasks: Vec<TaskId> = self.fleet.vm(vm)?.tasks().collect();
            for task in tasks {
                let _ = self.fleet.unassign_task(task);
            }
            if let Some(host) = host {
                let _ = self.fleet.detach_vm(vm, host);
            }
            let _ = self.fleet.remove_vm(vm);
        }

        let machines: Vec<MachineId> = self.fleet.machines().map(|m| m.id).collect();
        for machine in machines {
            if let Err(err) = cluster.set_machine_state(machine, SleepState::S5) {
                warn!(%machine, %err, "final power-down failed");
            }
            let _ = self.fleet.set_tier(machine, Tier::Off);
        }

        let report = FinalReport {
            sla0_violation_pct: cluster.sla_report(SlaClass::Sla0),
            sla1_violation_pct: cluster.sla_report(SlaClass::Sla1),
            sla2_violation_pct: cluster.sla_report(SlaClass::Sla2),
            total_energy_kwh: cluster.cluster_energy_kwh(),
            wall_time_secs: now as f64 / MICROS_PER_SEC as f64,
        };
        info!("SLA violation report");
        info!("SLA0: {:.2}%", report.sla0_violation_pct);
        info!("SLA1: {:.2}%", report.sla1_violation_pct);
        info!("SLA2: {:.2}%", report.sla2_violation_pct);
        info!("Total energy {:.3} KW-hour", report.total_energy_kwh);
        info!(
            "Simulation run finished in {:.3} seconds ({} promotions, {} demotions, {} migrations)",
            report.wall_time_secs,
            self.power.promotions,
            self.power.demotions,
            self.consolidation.migrations_started,
        );
        Ok(report)
    }

    /// Shut down and unregister a VM that holds no tasks and is not in
    /// flight, then try to demote the host it vacated.
    fn reap_vm_if_empty<C: Cluster + ?Sized>(&mut self, cluster: &mut C, vm: VmId) -> Result<()> {
        let (empty, migrating, host) = {
            let v = self.fleet.vm(vm)?;
            (v.is_empty(), v.is_migrating, v.host)
        };
        if !empty || migrating {
            return Ok(());
        }
        let Some(host) = host else { return Ok(()) };
        cluster.shutdown_vm(vm)?;
        self.fleet.detach_vm(vm, host)?;
        self.fleet.remove_vm(vm)?;
        debug!(%vm, %host, "empty vm shut down");
        self.power.try_demote_idle(&mut self.fleet, cluster, host);
        Ok(())
    }

    /// Largest-footprint VM on the machine that is not already migrating.
    fn largest_stationary_vm(&self, machine: MachineId) -> Option<VmId> {
        let m = self.fleet.machine(machine).ok()?;
        m.vms()
            .filter_map(|vm| self.fleet.vm(vm).ok())
            .filter(|v| !v.is_migrating)
            .max_by_key(|v| v.memory_committed)
            .map(|v| v.id)
    }

    /// Least-utilized compatible Active host able to take the VM.
    fn least_utilized_sink<C: Cluster + ?Sized>(
        &self,
        cluster: &C,
        source: MachineId,
        vm: VmId,
    ) -> Result<Option<MachineId>> {
        let family = self.fleet.machine(source)?.cpu;
        let mut best: Option<(MachineId, f64)> = None;
        for m in self.fleet.machines_of_family(family) {
            if m.id == source || m.tier != Tier::Active {
                continue;
            }
            if !can_machine_host_vm(&self.fleet, m.id, vm) {
                continue;
            }
            let util = utilization(&self.fleet, cluster, m.id)?;
            if best.map(|(_, u)| util < u).unwrap_or(true) {
                best = Some((m.id, util));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    /// Like `least_utilized_sink`, restricted to hosts strictly quieter
    /// than the one the VM is leaving.
    fn quieter_sink<C: Cluster + ?Sized>(
        &self,
        cluster: &C,
        source: MachineId,
        vm: VmId,
        source_util: f64,
    ) -> Result<Option<MachineId>> {
        let best = self.least_utilized_sink(cluster, source, vm)?;
        match best {
            Some(sink) if utilization(&self.fleet, cluster, sink)? < source_util => Ok(Some(sink)),
            _ => Ok(None),
        }
    }

    /// Sweep Active machines that own nothing and park them in Standby.
    fn demote_idle_actives<C: Cluster + ?Sized>(&mut self, cluster: &mut C) {
        let idle: Vec<MachineId> = self
            .fleet
            .machines()
            .filter(|m| m.tier == Tier::Active && m.vm_count() == 0 && !m.changing_state)
            .map(|m| m.id)
            .collect();
        for machine in idle {
            self.power.try_demote_idle(&mut self.fleet, cluster, machine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Call, StubCluster};
    use stratus_core::{CpuFamily, VmType};

    const HOUR: SimTime = 3_600 * MICROS_PER_SEC;

    /// Config that keeps every machine Active at init.
    fn flat_cfg() -> SchedulerConfig {
        SchedulerConfig {
            initial_standby_fraction: 0.0,
            initial_off_fraction: 0.0,
            ..SchedulerConfig::default()
        }
    }

    fn checked(s: &Scheduler) {
        s.fleet().check_invariants().expect("fleet invariants violated");
    }

    fn x86_task(cluster: &mut StubCluster, memory: u64, instructions: u64, target: SimTime) -> TaskId {
        cluster.add_task(
            CpuFamily::X86,
            VmType::Linux,
            SlaClass::Sla0,
            memory,
            instructions,
            0,
            target,
        )
    }

    #[test]
    fn duplicate_arrival_is_a_noop() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::X86, 8192, 1000, 100);
        let task = x86_task(&mut cluster, 1024, 1_000_000, HOUR);
        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();

        s.on_new_task(&mut cluster, 0, task).unwrap();
        s.on_new_task(&mut cluster, 10, task).unwrap();

        let adds = cluster.calls_matching(|c| matches!(c, Call::AddTask(..)));
        assert_eq!(adds.len(), 1, "second delivery must not place again");
        checked(&s);
    }

    #[test]
    fn duplicate_arrival_of_queued_task_is_a_noop() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::Arm, 8192, 1000, 100);
        let task = x86_task(&mut cluster, 1024, 1_000_000, HOUR);
        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();

        s.on_new_task(&mut cluster, 0, task).unwrap();
        assert_eq!(s.queued_tasks(), 1);
        s.on_new_task(&mut cluster, 10, task).unwrap();
        assert_eq!(s.queued_tasks(), 1, "queued task must not queue twice");
    }

    #[test]
    fn completion_is_the_inverse_of_placement() {
        let mut cluster = StubCluster::new();
        let machine = cluster.add_machine(CpuFamily::X86, 8192, 1000, 100);
        let task = x86_task(&mut cluster, 1024, 1_000_000, HOUR);
        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();

        let before = s.fleet().machine(machine).unwrap().memory_committed;
        s.on_new_task(&mut cluster, 0, task).unwrap();
        assert_eq!(
            s.fleet().machine(machine).unwrap().memory_committed,
            before + 8 + 1024
        );

        s.on_task_complete(&mut cluster, 1000, task).unwrap();
        assert!(!s.fleet().contains_task(task));
        assert_eq!(s.fleet().machine(machine).unwrap().memory_committed, before);
        // The emptied VM was shut down.
        assert_eq!(
            cluster.calls_matching(|c| matches!(c, Call::Shutdown(_))).len(),
            1
        );
        checked(&s);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::X86, 8192, 1000, 100);
        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();

        s.on_task_complete(&mut cluster, 0, TaskId(99)).unwrap();
        s.on_migration_done(&mut cluster, 0, VmId(42)).unwrap();
        s.on_state_change_complete(&mut cluster, 0, MachineId(7)).unwrap();
        checked(&s);
    }

    #[test]
    fn single_family_capacity_wall() {
        let mut cluster = StubCluster::new();
        for _ in 0..4 {
            cluster.add_machine(CpuFamily::X86, 8192, 1000, 100);
        }
        let tasks: Vec<TaskId> = (0..17)
            .map(|_| x86_task(&mut cluster, 1024, 1_000_000, 1000 * HOUR))
            .collect();

        let cfg = SchedulerConfig {
            max_tasks_per_vm: 2,
            max_vm_per_machine: 2,
            ..flat_cfg()
        };
        let mut s = Scheduler::init(&mut cluster, cfg).unwrap();
        for &t in &tasks {
            s.on_new_task(&mut cluster, 0, t).unwrap();
        }

        let adds = cluster.calls_matching(|c| matches!(c, Call::AddTask(..)));
        assert_eq!(adds.len(), 16, "4 machines x 2 vms x 2 tasks");
        assert_eq!(s.queued_tasks(), 1);
        checked(&s);

        // The first completion frees a slot for the queued task.
        s.on_task_complete(&mut cluster, 100, tasks[0]).unwrap();
        let adds = cluster.calls_matching(|c| matches!(c, Call::AddTask(..)));
        assert_eq!(adds.len(), 17, "queued task placed on the freed slot");
        assert_eq!(s.queued_tasks(), 0);
        checked(&s);
    }

    #[test]
    fn family_mismatch_leaves_other_families_untouched() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::Arm, 8192, 1000, 100);
        cluster.add_machine(CpuFamily::Arm, 8192, 1000, 100);
        let weak_x86 = cluster.add_machine(CpuFamily::X86, 8192, 400, 100);
        let strong_x86 = cluster.add_machine(CpuFamily::X86, 8192, 1000, 100);
        let task = x86_task(&mut cluster, 1024, 1_000_000, HOUR);

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, task).unwrap();

        let attaches = cluster.calls_matching(|c| matches!(c, Call::AttachVm(..)));
        assert_eq!(attaches.len(), 1);
        assert_eq!(attaches[0], &Call::AttachVm(VmId(0), strong_x86));
        assert_eq!(s.fleet().machine(weak_x86).unwrap().vm_count(), 0);
        for arm in [MachineId(0), MachineId(1)] {
            let m = s.fleet().machine(arm).unwrap();
            assert_eq!(m.vm_count(), 0, "ARM machines must stay untouched");
            assert_eq!(m.tier, Tier::Active, "ARM tier must not change");
        }
        checked(&s);
    }

    #[test]
    fn tiered_wake_up_promotes_standby_and_replenishes_from_off() {
        let mut cluster = StubCluster::new();
        // Efficiency 10 down to 1, so rank order equals id order.
        for i in 0..10u64 {
            cluster.add_machine(CpuFamily::X86, 1032, 1000 - 100 * i, 100);
        }
        let cfg = SchedulerConfig {
            max_tasks_per_vm: 1,
            max_vm_per_machine: 1,
            standby_reserve: 4,
            ..SchedulerConfig::default()
        };
        let mut s = Scheduler::init(&mut cluster, cfg).unwrap();
        // Default split of 10: 2 active, 4 standby (S2), 4 off (S5).
        assert_eq!(
            cluster
                .calls_matching(|c| matches!(c, Call::SetState(_, SleepState::S2)))
                .len(),
            4
        );
        assert_eq!(
            cluster
                .calls_matching(|c| matches!(c, Call::SetState(_, SleepState::S5)))
                .len(),
            4
        );
        for m in [MachineId(2), MachineId(3), MachineId(4), MachineId(5)] {
            s.on_state_change_complete(&mut cluster, 0, m).unwrap();
        }
        for m in [MachineId(6), MachineId(7), MachineId(8), MachineId(9)] {
            s.on_state_change_complete(&mut cluster, 0, m).unwrap();
        }

        // Fill both active machines.
        for _ in 0..2 {
            let t = x86_task(&mut cluster, 1024, 1_000_000, 1000 * HOUR);
            s.on_new_task(&mut cluster, 0, t).unwrap();
        }
        assert_eq!(s.queued_tasks(), 0);

        // The next task wakes the best standby machine and is parked.
        let extra = x86_task(&mut cluster, 1024, 1_000_000, 1000 * HOUR);
        s.on_new_task(&mut cluster, 10, extra).unwrap();
        assert_eq!(s.queued_tasks(), 1);
        assert!(cluster
            .calls
            .contains(&Call::SetState(MachineId(2), SleepState::S0)));
        // Standby dropped below the reserve: one Off machine is warming.
        assert!(cluster
            .calls
            .iter()
            .filter(|c| matches!(c, Call::SetState(MachineId(6), SleepState::S2)))
            .count()
            >= 1);
        checked(&s);

        // Wake-up completes: the parked task lands on the woken machine.
        s.on_state_change_complete(&mut cluster, 20, MachineId(2)).unwrap();
        assert_eq!(s.queued_tasks(), 0);
        assert_eq!(s.fleet().machine(MachineId(2)).unwrap().vm_count(), 1);
        checked(&s);
    }

    /// Scenario: efficient machine A idle, inefficient machine B carrying a
    /// long-running VM. Consolidation must move the VM to A and, once the
    /// migration completes, demote B. Also the migration-preserves-
    /// assignment law: the task stays on its VM throughout.
    #[test]
    fn consolidation_migrates_long_vm_to_efficient_host_and_demotes_source() {
        let mut cluster = StubCluster::new();
        // A carries GPUs, so the non-GPU tasks land on B first.
        let a = cluster.add_machine_full(CpuFamily::X86, 1, 10_000, 1000, 100, true);
        let b = cluster.add_machine(CpuFamily::X86, 10_000, 400, 100);
        let long = x86_task(&mut cluster, 100, 10_000_000_000_000, 20_000 * MICROS_PER_SEC * 1000);
        let trigger = x86_task(&mut cluster, 100, 1_000_000, 1000 * HOUR);

        let cfg = SchedulerConfig {
            consolidation_every_n_completions: 1,
            ..flat_cfg()
        };
        let mut s = Scheduler::init(&mut cluster, cfg).unwrap();
        s.on_new_task(&mut cluster, 0, long).unwrap();
        s.on_new_task(&mut cluster, 0, trigger).unwrap();
        let vm = s.fleet().task(long).unwrap().vm;
        assert_eq!(s.fleet().vm(vm).unwrap().host, Some(b));

        s.on_task_complete(&mut cluster, 1000, trigger).unwrap();
        assert!(cluster.calls.contains(&Call::Migrate(vm, a)));
        assert!(s.fleet().vm(vm).unwrap().is_migrating);
        assert_eq!(s.fleet().vm(vm).unwrap().host, Some(a));
        // Source is not demoted until the VM has actually left.
        assert_eq!(s.fleet().machine(b).unwrap().tier, Tier::Active);
        checked(&s);

        s.on_migration_done(&mut cluster, 2000, vm).unwrap();
        assert!(!s.fleet().vm(vm).unwrap().is_migrating);
        assert_eq!(s.fleet().task(long).unwrap().vm, vm, "task follows its vm");
        assert_eq!(s.fleet().vm(vm).unwrap().host, Some(a));
        assert_eq!(s.fleet().machine(b).unwrap().tier, Tier::Standby);
        checked(&s);
    }

    #[test]
    fn consolidation_skips_vms_with_little_remaining_work() {
        let mut cluster = StubCluster::new();
        let _a = cluster.add_machine_full(CpuFamily::X86, 1, 10_000, 1000, 100, true);
        let b = cluster.add_machine(CpuFamily::X86, 10_000, 400, 100);
        // Runtime on B: 1e8 / 400 MIPS = 250 ms, far under the 15 min floor.
        let short = x86_task(&mut cluster, 100, 100_000_000, 1000 * HOUR);
        let trigger = x86_task(&mut cluster, 100, 1_000_000, 1000 * HOUR);

        let cfg = SchedulerConfig {
            consolidation_every_n_completions: 1,
            ..flat_cfg()
        };
        let mut s = Scheduler::init(&mut cluster, cfg).unwrap();
        s.on_new_task(&mut cluster, 0, short).unwrap();
        s.on_new_task(&mut cluster, 0, trigger).unwrap();
        assert_eq!(s.fleet().vm(s.fleet().task(short).unwrap().vm).unwrap().host, Some(b));

        s.on_task_complete(&mut cluster, 1000, trigger).unwrap();
        assert!(
            cluster.calls_matching(|c| matches!(c, Call::Migrate(..))).is_empty(),
            "short-lived vm must not pay migration overhead"
        );
        checked(&s);
    }

    #[test]
    fn sla_warning_migrates_vm_to_quieter_host() {
        let mut cluster = StubCluster::new();
        let a = cluster.add_machine_full(CpuFamily::X86, 1, 10_000, 1000, 100, true);
        let b = cluster.add_machine(CpuFamily::X86, 10_000, 1000, 100);
        let task = x86_task(&mut cluster, 100, 1_000_000_000_000, 10_000_000 * MICROS_PER_SEC);

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, task).unwrap();
        let vm = s.fleet().task(task).unwrap().vm;
        assert_eq!(s.fleet().vm(vm).unwrap().host, Some(b));

        s.on_sla_warning(&mut cluster, 1000, task).unwrap();
        assert!(cluster.calls.contains(&Call::Migrate(vm, a)));
        // No duplicate placement, no orphan VM.
        assert_eq!(cluster.calls_matching(|c| matches!(c, Call::AddTask(..))).len(), 1);
        assert_eq!(s.fleet().vms().count(), 1);
        checked(&s);

        s.on_migration_done(&mut cluster, 2000, vm).unwrap();
        assert_eq!(s.fleet().task(task).unwrap().vm, vm);
        checked(&s);
    }

    #[test]
    fn sla_warning_without_sink_raises_priority_and_cores() {
        let mut cluster = StubCluster::new();
        let host = cluster.add_machine_full(CpuFamily::X86, 2, 10_000, 1000, 100, false);
        let task = cluster.add_task(
            CpuFamily::X86,
            VmType::Linux,
            SlaClass::Sla1,
            100,
            1_000_000_000,
            0,
            HOUR,
        );

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, task).unwrap();

        s.on_sla_warning(&mut cluster, 1000, task).unwrap();
        assert!(cluster.calls.contains(&Call::SetPriority(task, Priority::High)));
        let floored = cluster.calls_matching(
            |c| matches!(c, Call::SetCorePerf(m, _, stratus_core::PerfState::P0) if *m == host),
        );
        assert_eq!(floored.len(), 2, "both cores floored at P0");
        checked(&s);
    }

    #[test]
    fn memory_warning_moves_largest_vm_away() {
        let mut cluster = StubCluster::new();
        let relief = cluster.add_machine_full(CpuFamily::X86, 1, 10_000, 1000, 100, true);
        let warned = cluster.add_machine(CpuFamily::X86, 10_000, 1000, 100);
        let small = x86_task(&mut cluster, 100, 1_000_000, 1000 * HOUR);
        let big = cluster.add_task(
            CpuFamily::X86,
            VmType::Win,
            SlaClass::Sla2,
            2000,
            1_000_000,
            0,
            1000 * HOUR,
        );

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, small).unwrap();
        s.on_new_task(&mut cluster, 0, big).unwrap();
        let big_vm = s.fleet().task(big).unwrap().vm;
        assert_eq!(s.fleet().vm(big_vm).unwrap().host, Some(warned));

        s.on_memory_warning(&mut cluster, 1000, warned).unwrap();
        assert!(
            cluster.calls.contains(&Call::Migrate(big_vm, relief)),
            "the largest-footprint vm is the one to move"
        );
        checked(&s);
    }

    #[test]
    fn periodic_sweep_raises_priority_near_deadline() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::X86, 10_000, 1000, 100);
        let urgent = cluster.add_task(
            CpuFamily::X86,
            VmType::Linux,
            SlaClass::Sla1,
            100,
            1_000_000,
            0,
            1_000_000,
        );
        let relaxed = cluster.add_task(
            CpuFamily::X86,
            VmType::Linux,
            SlaClass::Sla3,
            100,
            1_000_000,
            0,
            1_000_000,
        );

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, urgent).unwrap();
        s.on_new_task(&mut cluster, 0, relaxed).unwrap();

        // 85% of the budget elapsed: under the 0.2 threshold.
        s.on_periodic_check(&mut cluster, 850_000).unwrap();
        assert!(cluster.calls.contains(&Call::SetPriority(urgent, Priority::High)));
        assert!(
            !cluster.calls.contains(&Call::SetPriority(relaxed, Priority::High)),
            "SLA3 stays floored at LOW"
        );
        checked(&s);
    }

    #[test]
    fn tight_vm_overhead_blocks_placement() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::X86, 40, 1000, 100);
        let task = x86_task(&mut cluster, 30, 1_000_000, HOUR);

        let cfg = SchedulerConfig {
            vm_memory_overhead: 32,
            ..flat_cfg()
        };
        let mut s = Scheduler::init(&mut cluster, cfg).unwrap();
        s.on_new_task(&mut cluster, 0, task).unwrap();
        assert_eq!(s.queued_tasks(), 1, "32 + 30 does not fit in 40");

        let loose = flat_cfg();
        let mut cluster2 = StubCluster::new();
        cluster2.add_machine(CpuFamily::X86, 40, 1000, 100);
        let task2 = x86_task(&mut cluster2, 30, 1_000_000, HOUR);
        let mut s2 = Scheduler::init(&mut cluster2, loose).unwrap();
        s2.on_new_task(&mut cluster2, 0, task2).unwrap();
        assert_eq!(s2.queued_tasks(), 0, "8 + 30 fits in 40");
    }

    #[test]
    fn final_report_serializes() {
        let report = FinalReport {
            sla0_violation_pct: 1.5,
            sla1_violation_pct: 0.0,
            sla2_violation_pct: 12.25,
            total_energy_kwh: 420.5,
            wall_time_secs: 3600.0,
        };
        let json = serde_json::to_string(&report).unwrap();
        let parsed: FinalReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sla2_violation_pct, 12.25);
        assert_eq!(parsed.total_energy_kwh, 420.5);
    }

    #[test]
    fn simulation_complete_tears_down_and_reports() {
        let mut cluster = StubCluster::new();
        cluster.add_machine(CpuFamily::X86, 10_000, 1000, 100);
        let task = x86_task(&mut cluster, 100, 1_000_000, HOUR);
        cluster.energy_kwh = 12.5;
        cluster.sla.insert(SlaClass::Sla0, 1.0);
        cluster.sla.insert(SlaClass::Sla1, 2.5);

        let mut s = Scheduler::init(&mut cluster, flat_cfg()).unwrap();
        s.on_new_task(&mut cluster, 0, task).unwrap();

        let report = s
            .on_simulation_complete(&mut cluster, 90 * MICROS_PER_SEC)
            .unwrap();
        assert_eq!(report.sla0_violation_pct, 1.0);
        assert_eq!(report.sla1_violation_pct, 2.5);
        assert_eq!(report.sla2_violation_pct, 0.0);
        assert_eq!(report.total_energy_kwh, 12.5);
        assert!((report.wall_time_secs - 90.0).abs() < 1e-9);
        assert_eq!(cluster.calls_matching(|c| matches!(c, Call::Shutdown(_))).len(), 1);
        assert!(cluster
            .calls
            .contains(&Call::SetState(MachineId(0), SleepState::S5)));
        assert_eq!(s.fleet().vms().count(), 0);
    }
}
