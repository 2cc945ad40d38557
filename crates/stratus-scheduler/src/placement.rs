//! Placement engine
//!
//! Admission path for new tasks: walk the machines of the required family
//! in ranked order, reuse an existing VM or create one, and when active
//! capacity runs out, wake a machine and park the task on the retry queue
//! until `StateChangeComplete` drains it. Placement never blocks and never
//! polls the cluster for a state transition to finish.

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use stratus_core::{
    Cluster, MachineId, Priority, Result, SimTime, TaskId, TaskInfo, Tier, VmId,
};

use crate::capacity::{
    can_create_vm_on, can_host_task_on_vm, projected_utilization,
};
use crate::fleet::{FleetModel, TaskStatus};
use crate::power::PowerController;

/// Task parked until capacity frees up or a woken machine comes online.
#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    task: TaskId,
    queued_at: SimTime,
}

/// Outcome of one placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Task is running.
    Placed { vm: VmId, machine: MachineId },
    /// Task parked on the retry queue (a wake-up may be in flight).
    Queued,
    /// Duplicate delivery of a task the model already tracks.
    AlreadyPlaced,
}

/// Admission and retry machinery.
#[derive(Debug, Default)]
pub struct PlacementEngine {
    retry: VecDeque<QueuedTask>,
}

impl PlacementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks currently parked.
    pub fn queued(&self) -> usize {
        self.retry.len()
    }

    /// Place a task, waking machines if the active tier cannot take it.
    pub fn place<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerController,
        cluster: &mut C,
        now: SimTime,
        task: TaskId,
    ) -> Result<PlacementOutcome> {
        if fleet.contains_task(task) || self.retry.iter().any(|q| q.task == task) {
            warn!(%task, "duplicate task arrival ignored");
            return Ok(PlacementOutcome::AlreadyPlaced);
        }

        let info = cluster.task_info(task)?;
        let priority = Priority::from_sla(info.required_sla);

        if let Some(placed) = self.try_place_active(fleet, cluster, &info, priority)? {
            info!(%task, vm = %placed.0, machine = %placed.1, "task placed");
            return Ok(PlacementOutcome::Placed {
                vm: placed.0,
                machine: placed.1,
            });
        }

        // No active machine fits. Wake the highest-ranked standby machine
        // of the family, or failing that pull one out of Off, and park the
        // task until the state change completes. One wake per family at a
        // time: a drain pass re-queueing several tasks must not stampede
        // the standby tier.
        let wake_in_flight = fleet
            .machines_of_family(info.required_cpu)
            .any(|m| m.tier == Tier::Active && m.changing_state);
        if wake_in_flight {
            debug!(%task, "wake-up already in flight, task parked");
        } else if let Some(standby) = power.best_in_tier(fleet, info.required_cpu, Tier::Standby) {
            info!(%task, machine = %standby, "waking standby machine for queued task");
            if let Err(err) = power.promote_to_active(fleet, cluster, standby) {
                warn!(machine = %standby, %err, "standby promotion failed, task stays queued");
            }
        } else if let Some(off) = power.best_in_tier(fleet, info.required_cpu, Tier::Off) {
            info!(%task, machine = %off, "no standby available, warming off machine");
            if let Err(err) = power.promote_to_standby(fleet, cluster, off) {
                warn!(machine = %off, %err, "off promotion failed, task stays queued");
            }
        } else if fleet.machines_of_family(info.required_cpu).count() == 0 {
            error!(
                %task,
                family = %info.required_cpu,
                "unsatisfiable placement: no machine of required family exists"
            );
        } else {
            debug!(%task, "no machine available to wake, task pending");
        }

        self.retry.push_back(QueuedTask {
            task,
            queued_at: now,
        });
        Ok(PlacementOutcome::Queued)
    }

    /// Re-attempt every parked task, in arrival order. Called from
    /// `PeriodicCheck`, `StateChangeComplete`, and `TaskComplete`.
    pub fn drain_retry_queue<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        power: &mut PowerController,
        cluster: &mut C,
        now: SimTime,
    ) {
        let parked = std::mem::take(&mut self.retry);
        if parked.is_empty() {
            return;
        }
        debug!(parked = parked.len(), "draining placement retry queue");
        for entry in parked {
            match self.place(fleet, power, cluster, now, entry.task) {
                Ok(PlacementOutcome::Placed { .. }) => {
                    debug!(task = %entry.task, waited = now - entry.queued_at, "queued task placed");
                }
                Ok(_) => {}
                Err(err) => {
                    // Keep the task; a later event may make it placeable.
                    warn!(task = %entry.task, %err, "retry placement failed");
                    self.retry.push_back(entry);
                }
            }
        }
    }

    /// Ranked walk over active machines of the task's family. Two passes:
    /// the first skips GPU machines for non-GPU tasks, the second takes
    /// whatever fits.
    fn try_place_active<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        info: &TaskInfo,
        priority: Priority,
    ) -> Result<Option<(VmId, MachineId)>> {
        let candidates = ranked_active_candidates(fleet, info);
        for gpu_strict in [true, false] {
            for &machine in &candidates {
                let has_gpus = fleet.machine(machine)?.gpus;
                if gpu_strict && has_gpus && !info.gpu_capable {
                    continue;
                }
                if !gpu_strict && !(has_gpus && !info.gpu_capable) {
                    continue; // already tried in the strict pass
                }
                if projected_utilization(fleet, cluster, machine, info)? > 1.0 {
                    continue;
                }
                if let Some(vm) = self.place_on_machine(fleet, cluster, machine, info, priority)? {
                    return Ok(Some((vm, machine)));
                }
            }
        }
        Ok(None)
    }

    /// Try an existing VM first, then a fresh one.
    fn place_on_machine<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
        info: &TaskInfo,
        priority: Priority,
    ) -> Result<Option<VmId>> {
        let vms: Vec<VmId> = fleet.machine(machine)?.vms().collect();
        let existing = vms
            .into_iter()
            .find(|&vm| can_host_task_on_vm(fleet, vm, info));
        if let Some(vm) = existing {
            // The machine must still have memory for the task itself.
            if fleet.machine(machine)?.memory_free() >= info.required_memory {
                self.add_task(fleet, cluster, vm, info, priority)?;
                return Ok(Some(vm));
            }
        }

        if can_create_vm_on(fleet, machine, info.required_memory) {
            let vm = cluster.create_vm(info.required_vm, info.required_cpu)?;
            fleet.register_vm(vm, info.required_vm, info.required_cpu)?;
            cluster.attach_vm(vm, machine)?;
            if let Err(err) = fleet.attach_vm(vm, machine) {
                // The oracle accepted what the model refuses: undo the VM.
                error!(%vm, %machine, %err, "model rejected attach after actuator accepted");
                let _ = cluster.shutdown_vm(vm);
                let _ = fleet.remove_vm(vm);
                return Err(err);
            }
            self.add_task(fleet, cluster, vm, info, priority)?;
            debug!(%vm, %machine, "created vm for placement");
            return Ok(Some(vm));
        }
        Ok(None)
    }

    fn add_task<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        vm: VmId,
        info: &TaskInfo,
        priority: Priority,
    ) -> Result<()> {
        cluster.add_task_to_vm(vm, info.id, priority)?;
        let record = TaskStatus {
            id: info.id,
            vm,
            required_cpu: info.required_cpu,
            required_vm: info.required_vm,
            memory: info.required_memory,
            arrival: info.arrival,
            target_completion: info.target_completion,
            total_instructions: info.total_instructions,
            gpu_capable: info.gpu_capable,
            priority,
        };
        if let Err(err) = fleet.assign_task(record, vm) {
            error!(task = %info.id, %vm, %err, "model rejected task after actuator accepted");
            let _ = cluster.remove_task_from_vm(vm, info.id);
            return Err(err);
        }
        Ok(())
    }
}

/// Active-tier machines of the task's family, ranked by the efficiency
/// comparator, state-changing machines excluded.
fn ranked_active_candidates(fleet: &FleetModel, info: &TaskInfo) -> Vec<MachineId> {
    let mut members: Vec<_> = fleet
        .machines_of_family(info.required_cpu)
        .filter(|m| m.tier == Tier::Active && !m.changing_state)
        .collect();
    members.sort_by(|a, b| crate::capacity::compare_machines(a, b));
    members.iter().map(|m| m.id).collect()
}
