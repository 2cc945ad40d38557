//! Consolidation engine
//!
//! Shrinks the Active tier by moving VMs off low-efficiency or
//! under-utilized hosts onto better ones of the same CPU family. Sources
//! emptied here are demoted later, when `MigrationDone` confirms the VM
//! has actually left.

use tracing::{debug, info, warn};

use stratus_core::{Cluster, CpuFamily, MachineId, Result, SimTime, Tier, VmId};

use crate::capacity::{
    can_machine_host_vm, compare_machines, projected_utilization_with_vm, utilization,
    vm_remaining_runtime,
};
use crate::fleet::FleetModel;

/// Rebalancer state: just counters, the policy is stateless.
#[derive(Debug, Default)]
pub struct ConsolidationEngine {
    /// Migrations issued by the efficiency and low-utilization passes.
    pub migrations_started: u64,
}

impl ConsolidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the efficiency pass for every CPU family.
    pub fn run<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        now: SimTime,
    ) {
        for family in CpuFamily::ALL {
            if let Err(err) = self.run_family(fleet, cluster, now, family) {
                warn!(%family, %err, "consolidation pass aborted");
            }
        }
    }

    /// One family: rank active machines by the efficiency comparator,
    /// treat the top half as sinks and the bottom half as sources, and
    /// walk the two pools toward each other migrating every eligible VM.
    fn run_family<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        now: SimTime,
        family: CpuFamily,
    ) -> Result<()> {
        let ranked: Vec<MachineId> = {
            let mut members: Vec<_> = fleet
                .machines_of_family(family)
                .filter(|m| m.tier == Tier::Active)
                .collect();
            members.sort_by(|a, b| compare_machines(a, b));
            members.iter().map(|m| m.id).collect()
        };
        let half = ranked.len() / 2;
        if half == 0 {
            return Ok(());
        }
        let (sinks, sources) = ranked.split_at(half);
        let issued_before = self.migrations_started;

        let mut sink_idx = 0usize;
        // Sources are walked from the least-efficient end.
        let mut source_idx = sources.len();
        while source_idx > 0 && sink_idx < sinks.len() {
            let source = sources[source_idx - 1];
            let sink = sinks[sink_idx];

            if fleet.machine(source)?.changing_state {
                source_idx -= 1;
                continue;
            }
            if fleet.machine(sink)?.vm_count() >= fleet.config().max_vm_per_machine {
                sink_idx += 1;
                continue;
            }

            match self.drain_source_into(fleet, cluster, source, sink)? {
                PoolAdvance::SourceExhausted => source_idx -= 1,
                PoolAdvance::SinkFull => sink_idx += 1,
            }
        }
        let issued = self.migrations_started - issued_before;
        if issued > 0 {
            debug!(%family, time = now, issued, "consolidation pass complete");
        }
        Ok(())
    }

    /// Migrate migratable VMs from one source to one sink until one side
    /// runs out; reports which cursor to advance.
    fn drain_source_into<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        source: MachineId,
        sink: MachineId,
    ) -> Result<PoolAdvance> {
        loop {
            let Some(vm) = self.pick_migratable(fleet, cluster, source)? else {
                return Ok(PoolAdvance::SourceExhausted);
            };
            if !can_machine_host_vm(fleet, sink, vm)
                || projected_utilization_with_vm(fleet, cluster, sink, vm)? > 1.0
            {
                return Ok(PoolAdvance::SinkFull);
            }
            migrate_vm_to(fleet, cluster, vm, sink)?;
            self.migrations_started += 1;
        }
    }

    /// First VM on the machine that is not already moving and has enough
    /// remaining work to amortize the migration.
    fn pick_migratable<C: Cluster + ?Sized>(
        &self,
        fleet: &FleetModel,
        cluster: &C,
        machine: MachineId,
    ) -> Result<Option<VmId>> {
        let floor = fleet.config().migration_min_remaining;
        for vm in fleet.machine(machine)?.vms().collect::<Vec<_>>() {
            if fleet.vm(vm)?.is_migrating {
                continue;
            }
            if vm_remaining_runtime(fleet, cluster, vm)? > floor {
                return Ok(Some(vm));
            }
        }
        Ok(None)
    }

    /// Second pass: drain Active machines running below the utilization
    /// threshold onto busier hosts of the same family, regardless of which
    /// efficiency half they sit in.
    pub fn drain_low_utilization<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
    ) {
        let threshold = fleet.config().low_utilization_threshold;
        let candidates: Vec<MachineId> = fleet
            .machines()
            .filter(|m| m.tier == Tier::Active && !m.changing_state && m.vm_count() > 0)
            .map(|m| m.id)
            .collect();

        for source in candidates {
            let util = match utilization(fleet, cluster, source) {
                Ok(u) => u,
                Err(err) => {
                    warn!(machine = %source, %err, "utilization unavailable, skipping");
                    continue;
                }
            };
            if util >= threshold {
                continue;
            }
            let vms: Vec<VmId> = fleet
                .machine(source)
                .map(|m| m.vms().collect())
                .unwrap_or_default();
            for vm in vms {
                if fleet.vm(vm).map(|v| v.is_migrating).unwrap_or(true) {
                    continue;
                }
                match self.best_busier_sink(fleet, cluster, source, vm, util) {
                    Ok(Some(sink)) => {
                        if let Err(err) = migrate_vm_to(fleet, cluster, vm, sink) {
                            warn!(%vm, %sink, %err, "low-utilization migration failed");
                        } else {
                            self.migrations_started += 1;
                            info!(%vm, from = %source, to = %sink, "draining under-utilized host");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%vm, %err, "sink search failed"),
                }
            }
        }
    }

    /// Busiest compatible Active sink that stays within its budget and is
    /// more utilized than the source.
    fn best_busier_sink<C: Cluster + ?Sized>(
        &self,
        fleet: &FleetModel,
        cluster: &C,
        source: MachineId,
        vm: VmId,
        source_util: f64,
    ) -> Result<Option<MachineId>> {
        let family = fleet.machine(source)?.cpu;
        let mut best: Option<(MachineId, f64)> = None;
        for m in fleet.machines_of_family(family) {
            if m.id == source || m.tier != Tier::Active {
                continue;
            }
            if !can_machine_host_vm(fleet, m.id, vm) {
                continue;
            }
            let util = utilization(fleet, cluster, m.id)?;
            if util <= source_util {
                continue;
            }
            if projected_utilization_with_vm(fleet, cluster, m.id, vm)? > 1.0 {
                continue;
            }
            if best.map(|(_, u)| util > u).unwrap_or(true) {
                best = Some((m.id, util));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}

enum PoolAdvance {
    SourceExhausted,
    SinkFull,
}

/// Move one VM to a new host: record the route, re-home the VM in the
/// model, and issue the actuator call. The model reflects the sink
/// immediately; `MigrationDone` later clears the transit flags. Rolls the
/// model back if the actuator refuses.
pub(crate) fn migrate_vm_to<C: Cluster + ?Sized>(
    fleet: &mut FleetModel,
    cluster: &mut C,
    vm: VmId,
    sink: MachineId,
) -> Result<()> {
    let route = fleet.begin_migration(vm, sink)?;
    fleet.detach_vm(vm, route.source)?;
    if let Err(err) = fleet.attach_vm(vm, sink) {
        // Capacity was verified before the call; put the VM back.
        fleet.attach_vm(vm, route.source)?;
        fleet.abort_migration(vm)?;
        return Err(err);
    }
    if let Err(err) = cluster.migrate_vm(vm, sink) {
        warn!(%vm, %sink, %err, "cluster refused migration, rolling back");
        fleet.detach_vm(vm, sink)?;
        fleet.attach_vm(vm, route.source)?;
        fleet.abort_migration(vm)?;
        return Err(err);
    }
    info!(%vm, from = %route.source, to = %sink, "migration issued");
    Ok(())
}
