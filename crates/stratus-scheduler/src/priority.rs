//! Priority controller
//!
//! Periodic sweep that re-derives each live task's priority from how much
//! of its arrival-to-target budget remains. Priorities are written through
//! the actuator only; the model caches the last written value so the sweep
//! does not repeat writes.

use tracing::{debug, warn};

use stratus_core::{Cluster, Priority, SimTime, SlaClass, TaskId};

use crate::fleet::FleetModel;

/// Budget-driven priority sweep.
#[derive(Debug, Default)]
pub struct PriorityController;

impl PriorityController {
    pub fn new() -> Self {
        Self
    }

    /// Priority for a task with the given budget fraction remaining.
    /// SLA3 tasks are floored to LOW: they carry no deadline obligation.
    pub fn priority_for(
        &self,
        fleet: &FleetModel,
        sla: SlaClass,
        frac_remaining: f64,
    ) -> Priority {
        if sla == SlaClass::Sla3 {
            return Priority::Low;
        }
        let cfg = fleet.config();
        if frac_remaining < cfg.high_prio_threshold {
            Priority::High
        } else if frac_remaining < cfg.mid_prio_threshold {
            Priority::Mid
        } else {
            Priority::Low
        }
    }

    /// Re-evaluate every live task and push changed priorities to the
    /// cluster.
    pub fn sweep<C: Cluster + ?Sized>(
        &self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        now: SimTime,
    ) {
        let snapshot: Vec<(TaskId, SimTime, SimTime, Priority)> = fleet
            .tasks()
            .map(|t| (t.id, t.arrival, t.target_completion, t.priority))
            .collect();

        let mut updates: Vec<(TaskId, Priority)> = Vec::new();
        for (task, arrival, target, current) in snapshot {
            let budget = target.saturating_sub(arrival);
            if budget == 0 {
                continue;
            }
            let elapsed = now.saturating_sub(arrival);
            let frac_remaining = 1.0 - elapsed as f64 / budget as f64;
            let Ok(info) = cluster.task_info(task) else {
                continue;
            };
            let next = self.priority_for(fleet, info.required_sla, frac_remaining);
            if next != current {
                updates.push((task, next));
            }
        }

        for (task, priority) in updates {
            if let Err(err) = cluster.set_task_priority(task, priority) {
                warn!(%task, %err, "priority update rejected");
                continue;
            }
            if let Err(err) = fleet.set_task_priority(task, priority) {
                warn!(%task, %err, "priority not recorded");
            } else {
                debug!(%task, ?priority, "priority updated");
            }
        }
    }
}
